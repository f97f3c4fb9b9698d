mod intents;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::server::AppState;

pub fn admin_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/intents", get(intents::list_intents))
        .route("/intents/{id}/retry", post(intents::retry_intent))
}
