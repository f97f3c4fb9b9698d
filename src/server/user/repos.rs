use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::auth::RequireUser;
use crate::ledger::NewListing;
use crate::server::AppState;
use crate::server::dto::CreateListingRequest;
use crate::server::response::{ApiError, ApiResponse};
use crate::server::validation::{validate_price_cents, validate_repo_name};

pub async fn list_repos(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let repos = state
        .orchestrator
        .ledger()
        .owned_repositories(&auth.principal.id)?;

    Ok(Json(ApiResponse::success(repos)))
}

pub async fn create_repo(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateListingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_repo_name(&req.name)?;
    validate_price_cents(req.price_cents)?;

    let repo = state.orchestrator.ledger().create_listing(
        &auth.principal.id,
        NewListing {
            name: req.name,
            source_url: req.source_url,
            branch: req.branch,
            price_cents: req.price_cents,
        },
    )?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(repo))))
}

pub async fn delete_repo(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .orchestrator
        .ledger()
        .delete_listing(&auth.principal.id, &id)?;

    Ok(StatusCode::NO_CONTENT)
}
