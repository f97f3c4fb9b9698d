use std::fmt;

use serde::Serialize;

use crate::types::{IntentStatus, TransferIntent};

/// Why a settlement stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Input,
    Payment,
    Credentials,
    Migration,
    Ledger,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Input => "input",
            Self::Payment => "payment",
            Self::Credentials => "credentials",
            Self::Migration => "migration",
            Self::Ledger => "ledger",
        };
        f.write_str(s)
    }
}

/// Where a purchase is in the settlement pipeline.
///
/// ```text
/// Requested -> DirectTransfer ---------------------------------> Migrated -> Recorded
/// Requested -> OrderCreated -> Approved -> Authorized -> Captured -> Migrated -> Recorded
/// ```
///
/// `Failed` is reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementState {
    Requested,
    DirectTransfer,
    OrderCreated,
    Approved,
    Authorized,
    Captured,
    Migrated,
    Recorded,
    Failed(FailureReason),
}

impl SettlementState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Recorded | Self::Failed(_))
    }

    #[must_use]
    pub fn can_transition_to(&self, next: &Self) -> bool {
        use SettlementState::*;

        if let Failed(_) = next {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Requested, DirectTransfer)
                | (Requested, OrderCreated)
                | (OrderCreated, Approved)
                | (Approved, Authorized)
                | (Authorized, Captured)
                | (Captured, Migrated)
                | (DirectTransfer, Migrated)
                | (Migrated, Recorded)
        )
    }

    /// The state a persisted intent resumes from.
    #[must_use]
    pub fn resume_from(intent: &TransferIntent) -> Self {
        match intent.status {
            IntentStatus::Pending if intent.authorization_id.is_some() => Self::Authorized,
            IntentStatus::Pending if intent.order_id.is_some() => Self::OrderCreated,
            IntentStatus::Pending => Self::DirectTransfer,
            IntentStatus::Captured => Self::Captured,
            IntentStatus::Migrated => Self::Migrated,
            IntentStatus::Recorded => Self::Recorded,
            IntentStatus::Failed if intent.authorization_id.is_some() => {
                Self::Failed(FailureReason::Payment)
            }
            IntentStatus::Failed => Self::Failed(FailureReason::Migration),
        }
    }
}

impl fmt::Display for SettlementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("requested"),
            Self::DirectTransfer => f.write_str("direct_transfer"),
            Self::OrderCreated => f.write_str("order_created"),
            Self::Approved => f.write_str("approved"),
            Self::Authorized => f.write_str("authorized"),
            Self::Captured => f.write_str("captured"),
            Self::Migrated => f.write_str("migrated"),
            Self::Recorded => f.write_str("recorded"),
            Self::Failed(reason) => write!(f, "failed({reason})"),
        }
    }
}

/// A refused transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: SettlementState,
    pub to: SettlementState,
}

/// Tracks one purchase through the pipeline and logs every step.
#[derive(Debug)]
pub struct Progress {
    purchase: String,
    state: SettlementState,
}

impl Progress {
    pub fn new(purchase: impl Into<String>, state: SettlementState) -> Self {
        Self {
            purchase: purchase.into(),
            state,
        }
    }

    #[must_use]
    pub fn state(&self) -> SettlementState {
        self.state
    }

    pub fn advance(&mut self, next: SettlementState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(&next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        tracing::info!(
            purchase = %self.purchase,
            from = %self.state,
            to = %next,
            "settlement transition"
        );
        self.state = next;
        Ok(())
    }

    /// Moves to `Failed`. Already-terminal purchases stay where they are.
    pub fn fail(&mut self, reason: FailureReason) {
        if self.advance(SettlementState::Failed(reason)).is_err() {
            tracing::debug!(purchase = %self.purchase, state = %self.state, "failure after terminal state");
        }
    }
}
