//! API tokens.
//!
//! A token reads `codemart_<lookup>_<secret>`. The lookup is stored in clear
//! to find the row; the whole token is stored only as an Argon2id hash. Every
//! token is scoped either to the operator or to exactly one linked user.

use std::fmt;

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{Duration, Utc};
use rand::{Rng, distributions::Alphanumeric};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::Token;

// 64 MiB, one pass, four lanes.
const ARGON2_MEMORY_KIB: u32 = 64 * 1024;
const ARGON2_ITERATIONS: u32 = 1;
const ARGON2_PARALLELISM: u32 = 4;
const ARGON2_OUTPUT_LEN: usize = 32;

const TOKEN_PREFIX: &str = "codemart";
const LOOKUP_LENGTH: usize = 8;
const SECRET_LENGTH: usize = 24;

/// Fresh lookups drawn before giving up on a collision.
const ISSUE_ATTEMPTS: usize = 3;

/// Who a token acts for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenScope {
    Admin,
    User(String),
}

impl TokenScope {
    /// The scope a stored token grants. `None` for a user token whose owner
    /// was never set.
    #[must_use]
    pub fn of(token: &Token) -> Option<Self> {
        match (token.is_admin, &token.user_id) {
            (true, _) => Some(Self::Admin),
            (false, Some(user_id)) => Some(Self::User(user_id.clone())),
            (false, None) => None,
        }
    }
}

/// A bearer token as presented by a client, already checked for shape.
pub struct RawToken {
    value: String,
}

impl RawToken {
    pub fn parse(raw: &str) -> Result<Self> {
        let rest = raw
            .strip_prefix(TOKEN_PREFIX)
            .and_then(|r| r.strip_prefix('_'))
            .ok_or(Error::InvalidTokenFormat)?;

        let (lookup, secret) = rest.split_once('_').ok_or(Error::InvalidTokenFormat)?;
        let well_formed = lookup.len() == LOOKUP_LENGTH
            && secret.len() == SECRET_LENGTH
            && lookup.chars().all(|c| c.is_ascii_hexdigit())
            && secret.chars().all(|c| c.is_ascii_alphanumeric());
        if !well_formed {
            return Err(Error::InvalidTokenFormat);
        }

        Ok(Self {
            value: raw.to_string(),
        })
    }

    #[must_use]
    pub fn lookup(&self) -> &str {
        let start = TOKEN_PREFIX.len() + 1;
        &self.value[start..start + LOOKUP_LENGTH]
    }
}

impl fmt::Debug for RawToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawToken({TOKEN_PREFIX}_{}_***)", self.lookup())
    }
}

/// A newly issued token. `raw` is shown to its holder once and never stored.
pub struct IssuedToken {
    pub raw: String,
    pub token: Token,
}

pub struct TokenIssuer {
    argon2: Argon2<'static>,
}

impl TokenIssuer {
    pub fn new() -> Result<Self> {
        let params = Params::new(
            ARGON2_MEMORY_KIB,
            ARGON2_ITERATIONS,
            ARGON2_PARALLELISM,
            Some(ARGON2_OUTPUT_LEN),
        )
        .map_err(|e| Error::Config(format!("invalid argon2 params: {e}")))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Mints a token for `scope`. Nothing is persisted.
    pub fn issue(&self, scope: TokenScope, ttl: Option<Duration>) -> Result<IssuedToken> {
        let lookup = Uuid::new_v4().simple().to_string()[..LOOKUP_LENGTH].to_string();
        let secret: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SECRET_LENGTH)
            .map(char::from)
            .collect();
        let raw = format!("{TOKEN_PREFIX}_{lookup}_{secret}");

        let salt = SaltString::generate(&mut OsRng);
        let token_hash = self
            .argon2
            .hash_password(raw.as_bytes(), &salt)
            .map_err(|e| Error::Config(format!("failed to hash token: {e}")))?
            .to_string();

        let (is_admin, user_id) = match scope {
            TokenScope::Admin => (true, None),
            TokenScope::User(user_id) => (false, Some(user_id)),
        };
        let now = Utc::now();

        Ok(IssuedToken {
            raw,
            token: Token {
                id: Uuid::new_v4().to_string(),
                token_hash,
                token_lookup: lookup,
                is_admin,
                user_id,
                created_at: now,
                expires_at: ttl.map(|ttl| now + ttl),
                last_used_at: None,
            },
        })
    }

    /// Mints a token and stores it, drawing a new lookup if the first one
    /// is already taken.
    pub fn register(
        &self,
        store: &dyn Store,
        scope: TokenScope,
        ttl: Option<Duration>,
    ) -> Result<IssuedToken> {
        let mut attempt = 1;
        loop {
            let issued = self.issue(scope.clone(), ttl)?;
            match store.create_token(&issued.token) {
                Ok(()) => {
                    tracing::info!(
                        token_id = %issued.token.id,
                        admin = issued.token.is_admin,
                        "issued api token"
                    );
                    return Ok(issued);
                }
                Err(Error::TokenLookupCollision) if attempt < ISSUE_ATTEMPTS => {
                    tracing::debug!(attempt, "token lookup collision, reissuing");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Checks a presented token against the stored row it looked up.
    pub fn verify(&self, raw: &RawToken, stored: &Token) -> Result<bool> {
        if raw.lookup() != stored.token_lookup {
            return Ok(false);
        }

        let parsed_hash = PasswordHash::new(&stored.token_hash)
            .map_err(|e| Error::Config(format!("invalid hash format: {e}")))?;

        match self
            .argon2
            .verify_password(raw.value.as_bytes(), &parsed_hash)
        {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(Error::Config(format!("failed to verify token: {e}"))),
        }
    }
}
