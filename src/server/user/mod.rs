mod account;
mod purchases;
mod repos;

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post, put},
};

use crate::server::AppState;

pub fn user_router() -> Router<Arc<AppState>> {
    Router::new()
        // Purchases
        .route(
            "/purchases/create-order/{repo_name}",
            get(purchases::create_order),
        )
        .route("/purchases/success", get(purchases::approval_success))
        .route("/purchases/confirm", post(purchases::confirm))
        .route("/purchases/cancel", get(purchases::cancel))
        // Listings
        .route("/repos", get(repos::list_repos))
        .route("/repos", post(repos::create_repo))
        .route("/repos/{id}", delete(repos::delete_repo))
        // Account
        .route("/account", get(account::get_account))
        .route("/account/hosting-token", put(account::update_hosting_token))
}
