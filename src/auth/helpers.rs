use chrono::Utc;

use super::{RawToken, TokenIssuer};
use crate::store::Store;
use crate::types::{Token, User};

#[derive(Debug)]
pub enum TokenValidationError {
    InvalidScheme,
    InvalidToken,
    TokenExpired,
    InternalError,
}

pub struct ValidatedToken {
    pub token: Token,
    pub user: Option<User>,
}

/// Extracts a token string from a Basic auth header.
/// Expects format: Basic base64(x-token:actual_token)
pub fn extract_basic_auth_token(header: &str) -> Option<String> {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    let encoded = header.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;

    let (username, password) = credentials.split_once(':')?;

    if username != "x-token" {
        return None;
    }

    Some(password.to_string())
}

/// Validates a raw token against the store and loads its user, if any.
pub fn validate_token(
    store: &dyn Store,
    raw_token: &str,
) -> Result<ValidatedToken, TokenValidationError> {
    let raw = RawToken::parse(raw_token).map_err(|_| TokenValidationError::InvalidToken)?;

    let token = store
        .get_token_by_lookup(raw.lookup())
        .map_err(|_| TokenValidationError::InternalError)?
        .ok_or(TokenValidationError::InvalidToken)?;

    let issuer = TokenIssuer::new().map_err(|e| {
        tracing::error!("token issuer unavailable: {e}");
        TokenValidationError::InternalError
    })?;
    if !issuer
        .verify(&raw, &token)
        .map_err(|_| TokenValidationError::InternalError)?
    {
        return Err(TokenValidationError::InvalidToken);
    }

    if let Some(expires_at) = &token.expires_at {
        if expires_at < &Utc::now() {
            return Err(TokenValidationError::TokenExpired);
        }
    }

    let user = match &token.user_id {
        Some(user_id) => store
            .get_user(user_id)
            .map_err(|_| TokenValidationError::InternalError)?,
        None => None,
    };

    if let Err(e) = store.update_token_last_used(&token.id) {
        tracing::warn!("Failed to update token last_used_at: {e}");
    }

    Ok(ValidatedToken { token, user })
}

/// Extracts token from Authorization header (Bearer or Basic).
/// Returns None if no auth header is present.
/// Returns Err if the auth scheme is unsupported.
pub fn extract_token_from_header(
    auth_header: Option<&str>,
) -> Result<Option<String>, TokenValidationError> {
    let Some(header) = auth_header else {
        return Ok(None);
    };

    if let Some(token) = header.strip_prefix("Bearer ") {
        return Ok(Some(token.trim().to_string()));
    }

    if header.starts_with("Basic ") {
        return extract_basic_auth_token(header)
            .ok_or(TokenValidationError::InvalidToken)
            .map(Some);
    }

    Err(TokenValidationError::InvalidScheme)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenScope;
    use crate::store::SqliteStore;
    use chrono::Duration;
    use tempfile::TempDir;

    fn store_with_token(
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> (TempDir, SqliteStore, String) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();

        let mut issued = TokenIssuer::new()
            .unwrap()
            .issue(TokenScope::Admin, None)
            .unwrap();
        issued.token.id = "t1".to_string();
        issued.token.expires_at = expires_at;
        store.create_token(&issued.token).unwrap();

        (temp, store, issued.raw)
    }

    #[test]
    fn test_extract_bearer() {
        let token = extract_token_from_header(Some("Bearer codemart_abc")).unwrap();
        assert_eq!(token.as_deref(), Some("codemart_abc"));
    }

    #[test]
    fn test_extract_basic() {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode("x-token:codemart_abc");
        let token = extract_token_from_header(Some(&format!("Basic {encoded}"))).unwrap();
        assert_eq!(token.as_deref(), Some("codemart_abc"));
    }

    #[test]
    fn test_extract_missing_and_unsupported() {
        assert!(extract_token_from_header(None).unwrap().is_none());
        assert!(matches!(
            extract_token_from_header(Some("Digest abc")),
            Err(TokenValidationError::InvalidScheme)
        ));
    }

    #[test]
    fn test_validate_token() {
        let (_temp, store, raw) = store_with_token(None);

        let validated = validate_token(&store, &raw).unwrap();
        assert_eq!(validated.token.id, "t1");
        assert!(validated.user.is_none());

        let used = store
            .get_token_by_lookup(&validated.token.token_lookup)
            .unwrap()
            .unwrap();
        assert!(used.last_used_at.is_some());
    }

    #[test]
    fn test_validate_expired_token() {
        let (_temp, store, raw) = store_with_token(Some(Utc::now() - Duration::hours(1)));

        assert!(matches!(
            validate_token(&store, &raw),
            Err(TokenValidationError::TokenExpired)
        ));
    }

    #[test]
    fn test_validate_wrong_secret() {
        let (_temp, store, raw) = store_with_token(None);
        let tampered = format!("{}zzzz", &raw[..raw.len() - 4]);

        assert!(matches!(
            validate_token(&store, &tampered),
            Err(TokenValidationError::InvalidToken)
        ));
    }
}
