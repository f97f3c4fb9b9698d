use serde::{Deserialize, Serialize};

use crate::types::TransferRecord;

/// Query string of `GET /purchases/create-order/{repo_name}`.
#[derive(Debug, Default, Deserialize)]
pub struct CreateOrderParams {
    #[serde(default)]
    pub seller_id: Option<String>,
    #[serde(default)]
    pub repo_url: Option<String>,
    /// Decimal price the buyer was shown, e.g. `"12.50"`.
    #[serde(default)]
    pub repo_price: Option<String>,
}

/// Query string the processor appends to the approval return URL.
#[derive(Debug, Default, Deserialize)]
pub struct SuccessParams {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, rename = "PayerID")]
    pub payer_id: Option<String>,
    #[serde(default)]
    pub repo_name: String,
    #[serde(default)]
    pub repo_url: String,
    #[serde(default)]
    pub seller_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfirmForm {
    #[serde(default)]
    pub authorization_id: String,
    #[serde(default)]
    pub seller_id: String,
    #[serde(default)]
    pub repo_url: String,
    #[serde(default)]
    pub repo_name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateListingRequest {
    pub name: String,
    pub source_url: String,
    #[serde(default)]
    pub branch: Option<String>,
    pub price_cents: i64,
}

#[derive(Debug, Deserialize)]
pub struct HostingTokenRequest {
    pub token: String,
}

/// Body returned when a purchase completes without a payment step.
#[derive(Debug, Serialize)]
pub struct TransferResponse {
    pub status: &'static str,
    pub transfer: TransferRecord,
}
