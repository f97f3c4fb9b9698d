use std::sync::Arc;

use axum::{
    Form, Json,
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect, Response},
};

use crate::auth::RequireUser;
use crate::server::AppState;
use crate::server::dto::{ConfirmForm, CreateOrderParams, SuccessParams, TransferResponse};
use crate::server::response::{ApiError, ApiResponse};
use crate::server::validation::parse_price_cents;
use crate::settlement::{ApprovalCallback, ConfirmRequest, PurchaseOutcome, PurchaseRequest};

fn error_redirect(state: &AppState, message: &str) -> Response {
    let url = state.settings.frontend(&format!(
        "/error?message={}",
        urlencoding::encode(message)
    ));
    Redirect::to(&url).into_response()
}

/// Starts a purchase. Paid listings redirect the buyer to the processor's
/// approval page; free listings are transferred right away.
pub async fn create_order(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(repo_name): Path<String>,
    Query(params): Query<CreateOrderParams>,
) -> Response {
    let (Some(seller_id), Some(repo_url), Some(repo_price)) =
        (params.seller_id, params.repo_url, params.repo_price)
    else {
        return error_redirect(&state, "Missing seller_id, repo_url or repo_price");
    };

    let quoted_price_cents = match parse_price_cents(&repo_price) {
        Ok(cents) => cents,
        Err(message) => return error_redirect(&state, &message),
    };

    let request = PurchaseRequest {
        repo_name,
        seller_id,
        repo_url,
        quoted_price_cents,
        buyer: auth.principal,
    };

    match state.orchestrator.initiate_purchase(request).await {
        Ok(PurchaseOutcome::Redirect(order)) => match order.approval_url {
            Some(url) => Redirect::to(&url).into_response(),
            None => error_redirect(&state, "Payment processor returned no approval link"),
        },
        Ok(PurchaseOutcome::Transferred(transfer)) => Json(ApiResponse::success(TransferResponse {
            status: "transferred",
            transfer,
        }))
        .into_response(),
        Err(e) => {
            tracing::warn!("purchase initiation failed: {e}");
            error_redirect(&state, &e.to_string())
        }
    }
}

/// Return URL for an approved order. Authorizes the payment and hands the
/// authorization id to the frontend, which asks the buyer to confirm. The
/// listing in the redirect is the one the order was placed for.
pub async fn approval_success(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SuccessParams>,
) -> Redirect {
    let callback = ApprovalCallback {
        order_token: params.token,
        payer_id: params.payer_id,
        repo_name: params.repo_name,
        repo_url: params.repo_url,
        seller_id: params.seller_id,
    };

    let url = match state.orchestrator.approval_callback(callback).await {
        Ok(approved) => {
            let authorization_id = approved.order.authorization_id.unwrap_or_default();
            state.settings.frontend(&format!(
                "/success?authorization_id={}&seller_id={}&repo_url={}&repo_name={}",
                urlencoding::encode(&authorization_id),
                urlencoding::encode(&approved.seller_id),
                urlencoding::encode(&approved.repo_url),
                urlencoding::encode(&approved.repo_name),
            ))
        }
        Err(e) => {
            tracing::warn!("payment approval failed: {e}");
            state.settings.frontend(&format!(
                "/success?error={}",
                urlencoding::encode(&e.to_string())
            ))
        }
    };

    Redirect::to(&url)
}

pub async fn confirm(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Form(form): Form<ConfirmForm>,
) -> Result<impl IntoResponse, ApiError> {
    let request = ConfirmRequest {
        authorization_id: form.authorization_id,
        seller_id: form.seller_id,
        repo_url: form.repo_url,
        repo_name: form.repo_name,
        buyer: auth.principal,
    };

    let settlement = state.orchestrator.confirm_purchase(request).await?;

    Ok(Json(ApiResponse::success(settlement)))
}

pub async fn cancel(State(state): State<Arc<AppState>>) -> Redirect {
    Redirect::to(&state.settings.frontend("/cancel"))
}
