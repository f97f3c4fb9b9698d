use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

use crate::auth::RequireUser;
use crate::server::AppState;
use crate::server::dto::HostingTokenRequest;
use crate::server::response::{ApiError, ApiResponse};

pub async fn get_account(auth: RequireUser) -> impl IntoResponse {
    Json(ApiResponse::success(auth.principal))
}

/// Rotates the caller's code host token.
pub async fn update_hosting_token(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<HostingTokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .credentials
        .store_token(&auth.principal.id, req.token.trim())?;

    Ok(StatusCode::NO_CONTENT)
}
