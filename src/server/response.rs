use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;

use crate::credentials::CredentialError;
use crate::error::Error as StoreError;
use crate::ledger::LedgerError;
use crate::payment::PaymentError;
use crate::settlement::SettlementError;

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    #[must_use]
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }
}

/// API error that converts to a proper HTTP response
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    #[must_use]
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "data": null, "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::not_found("Not found"),
            StoreError::AlreadyExists | StoreError::Conflict(_) => {
                ApiError::conflict(err.to_string())
            }
            StoreError::BadRequest(message) => ApiError::bad_request(message),
            other => {
                tracing::error!("store error: {other}");
                ApiError::internal("Internal server error")
            }
        }
    }
}

impl From<CredentialError> for ApiError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::UserNotFound(_) => ApiError::not_found(err.to_string()),
            CredentialError::TokenAbsent(_) | CredentialError::EmptyToken => {
                ApiError::bad_request(err.to_string())
            }
            CredentialError::Store(e) => e.into(),
            other => {
                tracing::error!("credential error: {other}");
                ApiError::internal("Failed to access hosting credentials")
            }
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::BuyerNotFound(_)
            | LedgerError::SourceRepositoryNotFound(_)
            | LedgerError::NotFound(_) => ApiError::not_found(err.to_string()),
            LedgerError::NotDeletable(_) => ApiError::forbidden(err.to_string()),
            LedgerError::InvalidListing(_) => ApiError::bad_request(err.to_string()),
            LedgerError::DuplicateListing(_) => ApiError::conflict(err.to_string()),
            LedgerError::Store(e) => e.into(),
        }
    }
}

impl From<SettlementError> for ApiError {
    fn from(err: SettlementError) -> Self {
        match err {
            e if e.is_input_error() => ApiError::bad_request(e.to_string()),
            SettlementError::IntentNotFound(_) => ApiError::not_found(err.to_string()),
            SettlementError::InvalidTransition(_) | SettlementError::AmountMismatch { .. } => {
                ApiError::conflict(err.to_string())
            }
            SettlementError::Payment(PaymentError::InvalidAmount(_)) => {
                ApiError::bad_request(err.to_string())
            }
            SettlementError::Transport(crate::transport::TransportError::InvalidRepositoryUrl(
                _,
            )) => ApiError::bad_request(err.to_string()),
            SettlementError::Payment(_) | SettlementError::Transport(_) => {
                tracing::warn!("settlement failed upstream: {err}");
                ApiError::bad_gateway(err.to_string())
            }
            SettlementError::Credential(e) => e.into(),
            SettlementError::Ledger(e) => e.into(),
            SettlementError::Store(e) => e.into(),
            other => ApiError::bad_request(other.to_string()),
        }
    }
}
