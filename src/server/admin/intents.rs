use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};

use crate::auth::RequireAdmin;
use crate::server::AppState;
use crate::server::response::{ApiError, ApiResponse};

/// Intents whose payment was captured but whose transfer is not recorded.
pub async fn list_intents(
    _auth: RequireAdmin,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let intents = state.orchestrator.pending_intents()?;
    Ok(Json(ApiResponse::success(intents)))
}

pub async fn retry_intent(
    _auth: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let settlement = state.orchestrator.reconcile(&id).await?;
    Ok(Json(ApiResponse::success(settlement)))
}
