use std::fmt;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use rand::{Rng, thread_rng};

use super::{CredentialError, HostToken};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Symmetric cipher for hosting tokens at rest.
///
/// Ciphertexts are `base64(nonce || aes-256-gcm(token))` with a fresh random
/// 96-bit nonce per encryption, so encrypting the same token twice yields
/// different strings.
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}

impl TokenCipher {
    /// Builds the cipher from a base64-encoded 32-byte key.
    pub fn from_base64_key(key_b64: &str) -> Result<Self, CredentialError> {
        let key_b64 = key_b64.trim();
        if key_b64.is_empty() {
            return Err(CredentialError::InvalidKey("key is empty".into()));
        }

        let key_bytes = STANDARD
            .decode(key_b64)
            .map_err(|e| CredentialError::InvalidKey(format!("not valid base64: {e}")))?;

        if key_bytes.len() != KEY_LEN {
            return Err(CredentialError::InvalidKey(format!(
                "key must be {KEY_LEN} bytes, got {}",
                key_bytes.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| CredentialError::InvalidKey(e.to_string()))?;

        Ok(Self { cipher })
    }

    /// Generates a fresh base64-encoded key suitable for `from_base64_key`.
    #[must_use]
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_LEN];
        thread_rng().fill(&mut key);
        STANDARD.encode(key)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CredentialError> {
        if plaintext.is_empty() {
            return Err(CredentialError::EmptyToken);
        }

        let mut nonce_bytes = [0u8; NONCE_LEN];
        thread_rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CredentialError::EncryptionFailure)?;

        let mut out = nonce_bytes.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(out))
    }

    pub fn decrypt(&self, encrypted: &str) -> Result<HostToken, CredentialError> {
        let data = STANDARD
            .decode(encrypted.trim())
            .map_err(|_| CredentialError::DecryptionFailure)?;

        if data.len() <= NONCE_LEN {
            return Err(CredentialError::DecryptionFailure);
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CredentialError::DecryptionFailure)?;

        String::from_utf8(plaintext)
            .map(HostToken::new)
            .map_err(|_| CredentialError::DecryptionFailure)
    }
}
