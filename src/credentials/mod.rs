//! Hosting-platform credentials.
//!
//! Users link a code host account once; the access token is stored encrypted
//! and only decrypted here, on demand, when a migration needs it.

mod cipher;
mod resolver;

use std::fmt;

use thiserror::Error;

pub use cipher::TokenCipher;
pub use resolver::CredentialResolver;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("user {0} has no linked hosting account")]
    TokenAbsent(String),

    #[error("failed to decrypt hosting token")]
    DecryptionFailure,

    #[error("failed to encrypt hosting token")]
    EncryptionFailure,

    #[error("hosting token cannot be empty")]
    EmptyToken,

    #[error("invalid credential key: {0}")]
    InvalidKey(String),

    #[error(transparent)]
    Store(#[from] crate::error::Error),
}

/// A decrypted hosting-platform access token. `Debug` never shows the value.
#[derive(Clone, PartialEq, Eq)]
pub struct HostToken(String);

impl HostToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for HostToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostToken(***)")
    }
}
