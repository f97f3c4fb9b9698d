//! Settlement orchestration: drives a purchase from price check through
//! payment capture, repository migration and the ledger write.
//!
//! Every purchase is backed by a persisted transfer intent. Paid intents are
//! opened together with the processor order, so the authorization and the
//! capture can only ever apply to the listing and amount the order was
//! created for. Intents advance as each step commits. An intent left in
//! `captured` or `migrated` is a reconciliation candidate and can be resumed
//! with [`SettlementOrchestrator::reconcile`].

mod orchestrator;
mod state;

use serde::Serialize;
use thiserror::Error;

use crate::credentials::CredentialError;
use crate::ledger::LedgerError;
use crate::payment::PaymentError;
use crate::transport::TransportError;
use crate::types::{PaymentOrder, Principal, TransferRecord};

pub use orchestrator::SettlementOrchestrator;
pub use state::{FailureReason, InvalidTransition, Progress, SettlementState};

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("missing payment callback parameters")]
    MissingCallbackParams,

    #[error("invalid repository url: {0}")]
    InvalidRepositoryUrl(String),

    #[error("source repository not found: {0}")]
    SourceRepositoryNotFound(String),

    #[error("price mismatch: quoted {quoted} cents, listed at {listed} cents")]
    PriceMismatch { quoted: i64, listed: i64 },

    #[error("cannot purchase your own repository")]
    SelfPurchase,

    #[error("order was placed for {bound}, not {requested}")]
    ListingMismatch { bound: String, requested: String },

    #[error("processor authorized {authorized} cents, order was for {expected} cents")]
    AmountMismatch { authorized: i64, expected: i64 },

    #[error("transfer intent not found: {0}")]
    IntentNotFound(String),

    #[error("invalid settlement transition from {} to {}", .0.from, .0.to)]
    InvalidTransition(InvalidTransition),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] crate::error::Error),
}

impl From<InvalidTransition> for SettlementError {
    fn from(err: InvalidTransition) -> Self {
        Self::InvalidTransition(err)
    }
}

impl SettlementError {
    /// Errors caused by the request itself rather than a collaborator.
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::MissingCallbackParams
                | Self::InvalidRepositoryUrl(_)
                | Self::SourceRepositoryNotFound(_)
                | Self::PriceMismatch { .. }
                | Self::SelfPurchase
                | Self::ListingMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SettlementError>;

#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    pub repo_name: String,
    pub seller_id: String,
    pub repo_url: String,
    pub quoted_price_cents: i64,
    pub buyer: Principal,
}

#[derive(Debug, Clone)]
pub enum PurchaseOutcome {
    /// The buyer must approve the order at `approval_url`.
    Redirect(PaymentOrder),
    /// Free listing; ownership already moved.
    Transferred(TransferRecord),
}

/// Query parameters the processor appends when sending the buyer back.
#[derive(Debug, Clone, Default)]
pub struct ApprovalCallback {
    pub order_token: Option<String>,
    pub payer_id: Option<String>,
    pub repo_name: String,
    pub repo_url: String,
    pub seller_id: String,
}

/// An order the processor has authorized, described by the listing its
/// intent is bound to.
#[derive(Debug, Clone)]
pub struct ApprovedPurchase {
    pub order: PaymentOrder,
    pub seller_id: String,
    pub repo_url: String,
    pub repo_name: String,
}

#[derive(Debug, Clone)]
pub struct ConfirmRequest {
    pub authorization_id: String,
    pub seller_id: String,
    pub repo_url: String,
    pub repo_name: String,
    pub buyer: Principal,
}

#[derive(Debug, Clone, Serialize)]
pub struct Settlement {
    pub status: &'static str,
    pub processor_response: serde_json::Value,
    pub transfer: TransferRecord,
}
