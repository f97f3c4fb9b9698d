//! Transfer ledger: the durable record of who owns which repository.
//!
//! Recording a transfer is the durability boundary of a purchase. Once
//! `record_transfer` returns, the buyer owns the new repository.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::error::Error;
use crate::store::Store;
use crate::transport::parse_repository_url;
use crate::types::{DEFAULT_BRANCH, Repository, TransferRecord};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("buyer not found: {0}")]
    BuyerNotFound(String),

    #[error("source repository not found: {0}")]
    SourceRepositoryNotFound(String),

    #[error("repository {0} was acquired by transfer and cannot be deleted")]
    NotDeletable(String),

    #[error("repository not found: {0}")]
    NotFound(String),

    #[error("invalid listing: {0}")]
    InvalidListing(String),

    #[error("repository already listed: {0}")]
    DuplicateListing(String),

    #[error(transparent)]
    Store(#[from] Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub buyer_id: String,
    pub name: String,
    pub url: String,
    pub seller_id: String,
    pub seller_repository_id: String,
    pub branch: String,
    /// Saga intent this transfer settles. Recording is idempotent per intent.
    pub intent_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewListing {
    pub name: String,
    pub source_url: String,
    pub branch: Option<String>,
    pub price_cents: i64,
}

#[derive(Clone)]
pub struct TransferLedger {
    store: Arc<dyn Store>,
}

impl TransferLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn record_transfer(&self, transfer: NewTransfer) -> Result<TransferRecord> {
        // Intents are only opened against a listing that existed, so the
        // source check applies to transfers recorded without one.
        if transfer.intent_id.is_none()
            && self
                .store
                .get_repository(&transfer.seller_repository_id)?
                .is_none()
        {
            return Err(LedgerError::SourceRepositoryNotFound(
                transfer.seller_repository_id,
            ));
        }

        let row = Repository {
            id: Uuid::new_v4().to_string(),
            name: transfer.name,
            source_url: transfer.url,
            branch: transfer.branch,
            price_cents: 0,
            owner_id: transfer.buyer_id.clone(),
            is_transfer: true,
            seller_id: Some(transfer.seller_id),
            seller_repository_id: Some(transfer.seller_repository_id),
            transfer_intent_id: None,
            created_at: Utc::now(),
        };

        let recorded = self
            .store
            .record_transfer(&row, transfer.intent_id.as_deref())
            .map_err(|e| match e {
                Error::NotFound => LedgerError::BuyerNotFound(transfer.buyer_id.clone()),
                other => LedgerError::Store(other),
            })?;

        if recorded.id != row.id {
            tracing::info!(repository_id = %recorded.id, "transfer already recorded");
        } else {
            tracing::info!(
                repository_id = %recorded.id,
                buyer_id = %recorded.owner_id,
                "recorded transfer"
            );
        }

        TransferRecord::from_repository(&recorded).ok_or_else(|| {
            LedgerError::Store(Error::Conflict(format!(
                "repository {} lacks transfer linkage",
                recorded.id
            )))
        })
    }

    pub fn create_listing(&self, owner_id: &str, listing: NewListing) -> Result<Repository> {
        let name = listing.name.trim();
        if name.is_empty() {
            return Err(LedgerError::InvalidListing("name cannot be empty".into()));
        }
        if listing.price_cents < 0 {
            return Err(LedgerError::InvalidListing(
                "price cannot be negative".into(),
            ));
        }
        parse_repository_url(&listing.source_url)
            .map_err(|e| LedgerError::InvalidListing(e.to_string()))?;

        if self
            .store
            .find_repository_by_url(owner_id, &listing.source_url)?
            .is_some()
        {
            return Err(LedgerError::DuplicateListing(listing.source_url));
        }

        let branch = listing
            .branch
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string());

        let repo = Repository {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            source_url: listing.source_url,
            branch,
            price_cents: listing.price_cents,
            owner_id: owner_id.to_string(),
            is_transfer: false,
            seller_id: None,
            seller_repository_id: None,
            transfer_intent_id: None,
            created_at: Utc::now(),
        };
        self.store.create_repository(&repo)?;
        tracing::info!(repository_id = %repo.id, owner_id, "created listing");

        Ok(repo)
    }

    /// Deletes an original listing. Transferred copies keep their provenance
    /// and are never deleted; other users' listings look like missing ones.
    pub fn delete_listing(&self, owner_id: &str, repository_id: &str) -> Result<()> {
        let repo = self
            .store
            .get_repository(repository_id)?
            .filter(|r| r.owner_id == owner_id)
            .ok_or_else(|| LedgerError::NotFound(repository_id.to_string()))?;

        if repo.is_transfer {
            return Err(LedgerError::NotDeletable(repo.id));
        }

        if !self.store.delete_repository(&repo.id)? {
            return Err(LedgerError::NotFound(repo.id));
        }
        tracing::info!(repository_id = %repo.id, owner_id, "deleted listing");
        Ok(())
    }

    pub fn owned_repositories(&self, user_id: &str) -> Result<Vec<Repository>> {
        Ok(self.store.list_user_repositories(user_id)?)
    }

    /// Finds the seller's listing for `source_url`.
    pub fn listing(&self, seller_id: &str, source_url: &str) -> Result<Option<Repository>> {
        Ok(self.store.find_repository_by_url(seller_id, source_url)?)
    }
}
