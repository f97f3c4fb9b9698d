//! Payment processor integration.
//!
//! The `PaymentGateway` trait is the seam the settlement orchestrator talks to;
//! `ProcessorClient` implements it over the processor's REST API.

mod client;
mod token_cache;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::types::PaymentOrder;

pub use client::ProcessorClient;
pub use token_cache::{AccessTokenCache, FetchedToken};

pub type Result<T> = std::result::Result<T, PaymentError>;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment amount must be positive, got {0} cents")]
    InvalidAmount(i64),

    #[error("failed to obtain processor access token: {0}")]
    TokenExchangeFailed(String),

    #[error("order creation failed: {0}")]
    OrderCreationFailed(String),

    #[error("authorization failed: {0}")]
    AuthorizationFailed(String),

    #[error("capture failed with status {status}: {body}")]
    CaptureFailed { status: u16, body: String },

    #[error("payment processor request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Where the processor sends the buyer after approving or cancelling.
#[derive(Debug, Clone)]
pub struct ReturnContext {
    pub return_url: String,
    pub cancel_url: String,
}

/// Funds held against an approved order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Authorization {
    pub id: String,
    pub amount_cents: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// The processor's response body, passed through to the caller.
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// ISO 4217 code orders are created in.
    fn currency(&self) -> &str;

    /// Creates an order awaiting buyer approval. `amount_cents` must be
    /// positive; free transfers never reach the gateway.
    async fn create_order(
        &self,
        amount_cents: i64,
        description: &str,
        context: &ReturnContext,
    ) -> Result<PaymentOrder>;

    /// Authorizes an approved order and reports what the processor actually
    /// placed on hold.
    async fn authorize(&self, order_id: &str) -> Result<Authorization>;

    /// Captures an authorization. Once this succeeds the buyer has paid.
    async fn capture(&self, authorization_id: &str) -> Result<CaptureResult>;
}

/// Formats integer cents as the processor's decimal string, e.g. `1250` as `"12.50"`.
#[must_use]
pub fn format_amount(amount_cents: i64) -> String {
    format!("{}.{:02}", amount_cents / 100, amount_cents % 100)
}

/// Parses a non-negative decimal amount with at most two fraction digits,
/// e.g. `"12.5"` as `1250`.
#[must_use]
pub fn parse_amount_cents(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let (whole, fraction) = raw.split_once('.').unwrap_or((raw, ""));
    if (whole.is_empty() && fraction.is_empty())
        || fraction.len() > 2
        || !whole.chars().all(|c| c.is_ascii_digit())
        || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }

    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let fraction: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().ok()? * 10,
        _ => fraction.parse().ok()?,
    };
    whole.checked_mul(100)?.checked_add(fraction)
}
