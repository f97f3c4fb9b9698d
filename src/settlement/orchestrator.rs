use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use uuid::Uuid;

use super::{
    ApprovalCallback, ApprovedPurchase, ConfirmRequest, FailureReason, Progress, PurchaseOutcome,
    PurchaseRequest, Result, Settlement, SettlementError, SettlementState,
};
use crate::config::Settings;
use crate::credentials::CredentialResolver;
use crate::error::Error;
use crate::ledger::{NewTransfer, TransferLedger};
use crate::payment::{PaymentGateway, ReturnContext};
use crate::store::Store;
use crate::transport::{
    MigrationRequest, SnapshotTransport, destination_name, parse_repository_url,
};
use crate::types::{
    IntentStatus, OrderStatus, PaymentOrder, Principal, Repository, TransferIntent, TransferRecord,
};

const SETTLED_STATUS: &str = "captured";

/// Unwraps `result`, moving `progress` to `Failed(reason)` on error.
fn step<T, E>(
    progress: &mut Progress,
    reason: FailureReason,
    result: std::result::Result<T, E>,
) -> Result<T>
where
    E: Into<SettlementError>,
{
    result.map_err(|e| {
        progress.fail(reason);
        e.into()
    })
}

pub struct SettlementOrchestrator {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    transport: Arc<SnapshotTransport>,
    credentials: CredentialResolver,
    ledger: TransferLedger,
    settings: Settings,
}

impl SettlementOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        transport: Arc<SnapshotTransport>,
        credentials: CredentialResolver,
        settings: Settings,
    ) -> Self {
        let ledger = TransferLedger::new(store.clone());
        Self {
            store,
            gateway,
            transport,
            credentials,
            ledger,
            settings,
        }
    }

    pub fn ledger(&self) -> &TransferLedger {
        &self.ledger
    }

    /// Starts a purchase. Paid listings produce an order for the buyer to
    /// approve, bound to a pending intent; free listings are transferred
    /// immediately without touching the payment gateway.
    pub async fn initiate_purchase(&self, request: PurchaseRequest) -> Result<PurchaseOutcome> {
        let mut progress = Progress::new(
            format!("{}:{}", request.buyer.id, request.repo_url),
            SettlementState::Requested,
        );

        let listing = step(
            &mut progress,
            FailureReason::Input,
            self.listing_for(&request.buyer, &request.seller_id, &request.repo_url),
        )?;

        if listing.price_cents != request.quoted_price_cents {
            progress.fail(FailureReason::Input);
            return Err(SettlementError::PriceMismatch {
                quoted: request.quoted_price_cents,
                listed: listing.price_cents,
            });
        }

        if listing.is_free() {
            progress.advance(SettlementState::DirectTransfer)?;
            let intent = self.open_intent(&request.buyer, &listing, None)?;
            let (record, _) = self.drive(intent, &mut progress).await?;
            return Ok(PurchaseOutcome::Transferred(record));
        }

        let context =
            self.return_context(&request.repo_name, &request.repo_url, &request.seller_id);
        let order = step(
            &mut progress,
            FailureReason::Payment,
            self.gateway
                .create_order(
                    listing.price_cents,
                    &format!("Purchase of repository {}", request.repo_name),
                    &context,
                )
                .await,
        )?;
        step(
            &mut progress,
            FailureReason::Payment,
            self.open_intent(&request.buyer, &listing, Some(&order.order_id)),
        )?;
        progress.advance(SettlementState::OrderCreated)?;

        Ok(PurchaseOutcome::Redirect(order))
    }

    /// Handles the buyer's return from the processor's approval page by
    /// authorizing the approved order and attaching the authorization to the
    /// order's intent.
    pub async fn approval_callback(&self, callback: ApprovalCallback) -> Result<ApprovedPurchase> {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        let (Some(order_id), Some(_payer_id)) = (
            non_empty(callback.order_token),
            non_empty(callback.payer_id),
        ) else {
            return Err(SettlementError::MissingCallbackParams);
        };

        let mut progress = Progress::new(order_id.clone(), SettlementState::OrderCreated);
        let mut intent = step(
            &mut progress,
            FailureReason::Input,
            self.store
                .get_intent_by_order(&order_id)
                .map_err(SettlementError::from)
                .and_then(|intent| {
                    intent.ok_or_else(|| SettlementError::IntentNotFound(order_id.clone()))
                }),
        )?;
        step(
            &mut progress,
            FailureReason::Input,
            Self::check_listing(&intent, &callback.seller_id, &callback.repo_url),
        )?;

        // The processor may send the buyer back more than once.
        if let Some(authorization_id) = intent.authorization_id.clone() {
            return Ok(self.approved(&intent, authorization_id, callback.repo_name));
        }
        if !intent.awaits_authorization() {
            return Err(SettlementError::InvalidTransition(super::InvalidTransition {
                from: SettlementState::resume_from(&intent),
                to: SettlementState::Authorized,
            }));
        }
        progress.advance(SettlementState::Approved)?;

        let authorization = step(
            &mut progress,
            FailureReason::Payment,
            self.gateway.authorize(&order_id).await,
        )?;
        if authorization.amount_cents != intent.amount_cents {
            tracing::warn!(
                intent_id = %intent.id,
                authorization_id = %authorization.id,
                "authorized amount differs from order, authorization left uncaptured"
            );
            let err = SettlementError::AmountMismatch {
                authorized: authorization.amount_cents,
                expected: intent.amount_cents,
            };
            return Err(self.halt(&mut intent, &mut progress, FailureReason::Payment, err));
        }

        intent.authorization_id = Some(authorization.id.clone());
        self.save(&mut intent)?;
        progress.advance(SettlementState::Authorized)?;

        Ok(self.approved(&intent, authorization.id, callback.repo_name))
    }

    /// Captures an authorized payment, migrates the repository and records
    /// the transfer.
    ///
    /// The authorization must belong to an intent the buyer opened; the
    /// listing is taken from that intent, never from the request. Confirming
    /// a second time resumes the intent instead of capturing again.
    pub async fn confirm_purchase(&self, request: ConfirmRequest) -> Result<Settlement> {
        let authorization_id = request.authorization_id.trim();
        if authorization_id.is_empty() {
            return Err(SettlementError::MissingCallbackParams);
        }

        let intent = self
            .store
            .get_intent_by_authorization(authorization_id)?
            .filter(|intent| intent.buyer_id == request.buyer.id)
            .ok_or_else(|| SettlementError::IntentNotFound(authorization_id.to_string()))?;
        Self::check_listing(&intent, &request.seller_id, &request.repo_url)?;

        tracing::info!(
            intent_id = %intent.id,
            status = %intent.status,
            "confirming transfer intent"
        );
        self.resume(intent, true).await
    }

    /// Resumes an intent from its persisted status. Recorded intents return
    /// their existing transfer.
    pub async fn reconcile(&self, intent_id: &str) -> Result<Settlement> {
        let intent = self
            .store
            .get_intent(intent_id)?
            .ok_or_else(|| SettlementError::IntentNotFound(intent_id.to_string()))?;

        tracing::info!(intent_id, status = %intent.status, "reconciling transfer intent");
        self.resume(intent, false).await
    }

    /// Intents whose payment was captured but whose transfer is not recorded.
    pub fn pending_intents(&self) -> Result<Vec<TransferIntent>> {
        let mut intents = self.store.list_intents_by_status(IntentStatus::Captured)?;
        intents.extend(self.store.list_intents_by_status(IntentStatus::Migrated)?);
        intents.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(intents)
    }

    async fn resume(&self, mut intent: TransferIntent, retry_capture: bool) -> Result<Settlement> {
        match intent.status {
            IntentStatus::Recorded => return self.recorded_settlement(&intent),
            IntentStatus::Failed if retry_capture && intent.authorization_id.is_some() => {
                intent.status = IntentStatus::Pending;
                intent.last_error = None;
                self.save(&mut intent)?;
            }
            IntentStatus::Failed => {
                return Err(SettlementError::InvalidTransition(super::InvalidTransition {
                    from: SettlementState::resume_from(&intent),
                    to: SettlementState::Migrated,
                }));
            }
            _ => {}
        }

        let mut progress = Progress::new(intent.id.clone(), SettlementState::resume_from(&intent));
        let (transfer, processor_response) = self.drive(intent, &mut progress).await?;

        Ok(Settlement {
            status: SETTLED_STATUS,
            processor_response,
            transfer,
        })
    }

    /// Runs the remaining steps of an intent: capture, migrate, record.
    /// Each step persists the intent before the next one starts.
    async fn drive(
        &self,
        mut intent: TransferIntent,
        progress: &mut Progress,
    ) -> Result<(TransferRecord, Value)> {
        let mut processor_response = None;

        if intent.awaits_authorization() {
            return Err(SettlementError::InvalidTransition(super::InvalidTransition {
                from: progress.state(),
                to: SettlementState::Captured,
            }));
        }

        if intent.status == IntentStatus::Pending {
            if let Some(authorization_id) = intent.authorization_id.clone() {
                match self.gateway.capture(&authorization_id).await {
                    Ok(capture) => {
                        intent.capture_id = capture.capture_id.clone();
                        intent.status = IntentStatus::Captured;
                        intent.last_error = None;
                        if let Err(e) = self.save(&mut intent) {
                            tracing::warn!(
                                intent_id = %intent.id,
                                authorization_id = %authorization_id,
                                error = %e,
                                "payment captured but intent not persisted, reconciliation candidate"
                            );
                            progress.fail(FailureReason::Payment);
                            return Err(e);
                        }
                        progress.advance(SettlementState::Captured)?;
                        processor_response = Some(capture.raw);
                    }
                    Err(e) => {
                        let err = e.into();
                        return Err(self.halt(&mut intent, progress, FailureReason::Payment, err));
                    }
                }
            }
        }

        if matches!(intent.status, IntentStatus::Pending | IntentStatus::Captured) {
            let request = match self.migration_request(&intent) {
                Ok(request) => request,
                Err(e) => {
                    return Err(self.halt(&mut intent, progress, FailureReason::Credentials, e));
                }
            };

            match self.transport.migrate(&request).await {
                Ok(url) => {
                    intent.destination_url = Some(url);
                    intent.status = IntentStatus::Migrated;
                    intent.last_error = None;
                    self.save(&mut intent)?;
                    progress.advance(SettlementState::Migrated)?;
                }
                Err(e) => {
                    let err = e.into();
                    return Err(self.halt(&mut intent, progress, FailureReason::Migration, err));
                }
            }
        }

        if intent.status != IntentStatus::Migrated {
            return Err(SettlementError::InvalidTransition(super::InvalidTransition {
                from: progress.state(),
                to: SettlementState::Recorded,
            }));
        }

        let transfer = NewTransfer {
            buyer_id: intent.buyer_id.clone(),
            name: intent.destination_name.clone(),
            url: intent.destination_url.clone().unwrap_or_default(),
            seller_id: intent.seller_id.clone(),
            seller_repository_id: intent.seller_repository_id.clone(),
            branch: intent.branch.clone(),
            intent_id: Some(intent.id.clone()),
        };
        let record = match self.ledger.record_transfer(transfer) {
            Ok(record) => record,
            Err(e) => {
                let err = e.into();
                return Err(self.halt(&mut intent, progress, FailureReason::Ledger, err));
            }
        };
        progress.advance(SettlementState::Recorded)?;

        let processor_response =
            processor_response.unwrap_or_else(|| Self::summarize_capture(&intent));
        Ok((record, processor_response))
    }

    /// Records a failed step on the intent and returns the error.
    ///
    /// Intents that already hold the buyer's money stay in their current
    /// status so they can be reconciled; all others are closed as failed.
    fn halt(
        &self,
        intent: &mut TransferIntent,
        progress: &mut Progress,
        reason: FailureReason,
        err: SettlementError,
    ) -> SettlementError {
        progress.fail(reason);
        intent.last_error = Some(err.to_string());
        if !intent.status.needs_reconciliation() {
            intent.status = IntentStatus::Failed;
        }

        if let Err(e) = self.save(intent) {
            tracing::error!(intent_id = %intent.id, error = %e, "failed to persist intent failure");
        }

        if intent.status.needs_reconciliation() {
            tracing::warn!(
                intent_id = %intent.id,
                status = %intent.status,
                error = %err,
                "transfer incomplete after capture, reconciliation candidate"
            );
        } else {
            tracing::info!(intent_id = %intent.id, error = %err, "transfer intent failed");
        }

        err
    }

    fn save(&self, intent: &mut TransferIntent) -> Result<()> {
        intent.updated_at = Utc::now();
        self.store.update_intent(intent)?;
        Ok(())
    }

    fn listing_for(
        &self,
        buyer: &Principal,
        seller_id: &str,
        repo_url: &str,
    ) -> Result<Repository> {
        parse_repository_url(repo_url)
            .map_err(|_| SettlementError::InvalidRepositoryUrl(repo_url.to_string()))?;

        if buyer.id == seller_id {
            return Err(SettlementError::SelfPurchase);
        }

        self.ledger
            .listing(seller_id, repo_url)?
            .ok_or_else(|| SettlementError::SourceRepositoryNotFound(repo_url.to_string()))
    }

    /// Rejects a request naming a different listing than the intent's.
    /// Empty fields defer to the intent.
    fn check_listing(intent: &TransferIntent, seller_id: &str, repo_url: &str) -> Result<()> {
        let differs = |given: &str, bound: &str| {
            let given = given.trim();
            !given.is_empty() && given != bound
        };

        if differs(seller_id, &intent.seller_id) || differs(repo_url, &intent.source_url) {
            return Err(SettlementError::ListingMismatch {
                bound: intent.source_url.clone(),
                requested: repo_url.trim().to_string(),
            });
        }
        Ok(())
    }

    fn approved(
        &self,
        intent: &TransferIntent,
        authorization_id: String,
        repo_name: String,
    ) -> ApprovedPurchase {
        let repo_name = if repo_name.trim().is_empty() {
            parse_repository_url(&intent.source_url)
                .map(|source| source.repo)
                .unwrap_or_default()
        } else {
            repo_name
        };

        ApprovedPurchase {
            order: PaymentOrder {
                order_id: intent.order_id.clone().unwrap_or_default(),
                approval_url: None,
                authorization_id: Some(authorization_id),
                amount_cents: intent.amount_cents,
                currency: self.gateway.currency().to_string(),
                status: OrderStatus::Authorized,
            },
            seller_id: intent.seller_id.clone(),
            repo_url: intent.source_url.clone(),
            repo_name,
        }
    }

    fn open_intent(
        &self,
        buyer: &Principal,
        listing: &Repository,
        order_id: Option<&str>,
    ) -> Result<TransferIntent> {
        let source = parse_repository_url(&listing.source_url)
            .map_err(|_| SettlementError::InvalidRepositoryUrl(listing.source_url.clone()))?;

        let now = Utc::now();
        let intent = TransferIntent {
            id: Uuid::new_v4().to_string(),
            buyer_id: buyer.id.clone(),
            seller_id: listing.owner_id.clone(),
            seller_repository_id: listing.id.clone(),
            source_url: listing.source_url.clone(),
            branch: listing.branch.clone(),
            destination_name: destination_name(&source.repo),
            amount_cents: listing.price_cents,
            order_id: order_id.map(str::to_string),
            authorization_id: None,
            capture_id: None,
            destination_url: None,
            transfer_repository_id: None,
            status: IntentStatus::Pending,
            last_error: None,
            created_at: now,
            updated_at: now,
        };

        self.store.create_intent(&intent).map_err(|e| match e {
            Error::AlreadyExists => SettlementError::Store(Error::Conflict(
                "a purchase for this order is already in progress".to_string(),
            )),
            other => SettlementError::Store(other),
        })?;
        tracing::info!(
            intent_id = %intent.id,
            buyer_id = %intent.buyer_id,
            seller_repository_id = %intent.seller_repository_id,
            "opened transfer intent"
        );

        Ok(intent)
    }

    fn migration_request(&self, intent: &TransferIntent) -> Result<MigrationRequest> {
        let source = parse_repository_url(&intent.source_url)
            .map_err(|_| SettlementError::InvalidRepositoryUrl(intent.source_url.clone()))?;

        Ok(MigrationRequest {
            source_owner: source.owner,
            source_repo: source.repo,
            branch: intent.branch.clone(),
            source_token: self.credentials.resolve_token(&intent.seller_id)?,
            destination_token: self.credentials.resolve_token(&intent.buyer_id)?,
            destination_name: intent.destination_name.clone(),
        })
    }

    fn recorded_settlement(&self, intent: &TransferIntent) -> Result<Settlement> {
        let transfer = intent
            .transfer_repository_id
            .as_deref()
            .map(|id| self.store.get_repository(id))
            .transpose()?
            .flatten()
            .as_ref()
            .and_then(TransferRecord::from_repository)
            .ok_or_else(|| SettlementError::IntentNotFound(intent.id.clone()))?;

        Ok(Settlement {
            status: SETTLED_STATUS,
            processor_response: Self::summarize_capture(intent),
            transfer,
        })
    }

    fn summarize_capture(intent: &TransferIntent) -> Value {
        json!({
            "id": intent.capture_id,
            "authorization_id": intent.authorization_id,
            "intent_id": intent.id,
        })
    }

    fn return_context(&self, repo_name: &str, repo_url: &str, seller_id: &str) -> ReturnContext {
        ReturnContext {
            return_url: self.settings.callback(&format!(
                "/api/v1/purchases/success?repo_name={}&repo_url={}&seller_id={}",
                urlencoding::encode(repo_name),
                urlencoding::encode(repo_url),
                urlencoding::encode(seller_id)
            )),
            cancel_url: self.settings.callback("/api/v1/purchases/cancel"),
        }
    }
}
