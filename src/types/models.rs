use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BRANCH: &str = "main";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip)]
    pub encrypted_hosting_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The authenticated caller, as supplied by the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.username.clone(),
            email: user.email.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    #[serde(skip)]
    pub token_hash: String,
    #[serde(skip)]
    pub token_lookup: String,
    pub is_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

/// A listed repository. Rows with `is_transfer` set were written by the
/// transfer ledger and always carry the seller linkage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    pub name: String,
    pub source_url: String,
    pub branch: String,
    pub price_cents: i64,
    pub owner_id: String,
    pub is_transfer: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller_repository_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Repository {
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.price_cents == 0
    }
}

/// Proof that ownership of a repository moved from a seller to a buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub repository_id: String,
    pub name: String,
    pub url: String,
    pub branch: String,
    pub owner_id: String,
    pub seller_id: String,
    pub seller_repository_id: String,
}

impl TransferRecord {
    /// Returns `None` for rows that were not created by a transfer.
    #[must_use]
    pub fn from_repository(repo: &Repository) -> Option<Self> {
        if !repo.is_transfer {
            return None;
        }
        Some(Self {
            repository_id: repo.id.clone(),
            name: repo.name.clone(),
            url: repo.source_url.clone(),
            branch: repo.branch.clone(),
            owner_id: repo.owner_id.clone(),
            seller_id: repo.seller_id.clone()?,
            seller_repository_id: repo.seller_repository_id.clone()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Approved,
    Authorized,
    Captured,
    Failed,
}

/// A payment order; lives only for the duration of one purchase attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentOrder {
    pub order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Recorded before funds are captured.
    Pending,
    Captured,
    Migrated,
    Recorded,
    Failed,
}

impl IntentStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Captured => "captured",
            Self::Migrated => "migrated",
            Self::Recorded => "recorded",
            Self::Failed => "failed",
        }
    }

    /// Funds have moved (or the transfer was free) but ownership has not been
    /// recorded yet.
    #[must_use]
    pub fn needs_reconciliation(&self) -> bool {
        matches!(self, Self::Captured | Self::Migrated)
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "captured" => Ok(Self::Captured),
            "migrated" => Ok(Self::Migrated),
            "recorded" => Ok(Self::Recorded),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown intent status: {other}")),
        }
    }
}

/// Persisted saga state for one settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferIntent {
    pub id: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub seller_repository_id: String,
    pub source_url: String,
    pub branch: String,
    pub destination_name: String,
    /// Listing price at the time the order was opened; zero for free transfers.
    pub amount_cents: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_repository_id: Option<String>,
    pub status: IntentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferIntent {
    /// A paid intent whose order the buyer has not approved yet.
    #[must_use]
    pub fn awaits_authorization(&self) -> bool {
        self.status == IntentStatus::Pending
            && self.authorization_id.is_none()
            && (self.order_id.is_some() || self.amount_cents > 0)
    }
}
