use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::{CredentialError, HostToken, TokenCipher};
use crate::store::Store;
use crate::types::User;

/// Maps users to their decrypted hosting tokens.
#[derive(Clone)]
pub struct CredentialResolver {
    store: Arc<dyn Store>,
    cipher: Arc<TokenCipher>,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn Store>, cipher: Arc<TokenCipher>) -> Self {
        Self { store, cipher }
    }

    pub fn resolve_token(&self, user_id: &str) -> Result<HostToken, CredentialError> {
        let user = self
            .store
            .get_user(user_id)?
            .ok_or_else(|| CredentialError::UserNotFound(user_id.to_string()))?;

        let encrypted = user
            .encrypted_hosting_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CredentialError::TokenAbsent(user_id.to_string()))?;

        self.cipher.decrypt(encrypted)
    }

    /// Replaces the stored token for an existing user.
    pub fn store_token(&self, user_id: &str, token: &str) -> Result<(), CredentialError> {
        let encrypted = self.cipher.encrypt(token)?;
        self.store
            .update_user_token(user_id, &encrypted)
            .map_err(|e| match e {
                crate::error::Error::NotFound => CredentialError::UserNotFound(user_id.to_string()),
                other => CredentialError::Store(other),
            })
    }

    /// Creates the user on first login, or rotates the token of the user
    /// already registered under `email`.
    pub fn link_user(
        &self,
        username: &str,
        email: &str,
        token: &str,
    ) -> Result<User, CredentialError> {
        let encrypted = self.cipher.encrypt(token)?;

        if let Some(mut user) = self.store.get_user_by_email(email)? {
            self.store.update_user_token(&user.id, &encrypted)?;
            tracing::info!(user_id = %user.id, "rotated hosting token");
            user.encrypted_hosting_token = Some(encrypted);
            user.updated_at = Utc::now();
            return Ok(user);
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            email: email.to_string(),
            encrypted_hosting_token: Some(encrypted),
            created_at: now,
            updated_at: now,
        };
        self.store.create_user(&user)?;
        tracing::info!(user_id = %user.id, "linked new user");

        Ok(user)
    }
}
