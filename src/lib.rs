//! # codemart
//!
//! A marketplace server for selling source-code repositories. A purchase
//! captures payment through an external processor, copies the repository
//! from the seller's code host account into the buyer's, and records the
//! new ownership.
//!
//! ## Library Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use codemart::server::{AppState, create_router};
//! use codemart::settlement::SettlementOrchestrator;
//! use codemart::store::SqliteStore;
//!
//! let store = Arc::new(SqliteStore::new("./data/codemart.db")?);
//! store.initialize()?;
//!
//! let orchestrator = SettlementOrchestrator::new(store.clone(), gateway, transport, credentials.clone(), settings.clone());
//! let state = Arc::new(AppState::new(store, Arc::new(orchestrator), credentials, settings));
//! let router = create_router(state);
//! // Serve with axum...
//! ```

pub mod auth;
pub mod config;
pub mod credentials;
pub mod error;
pub mod ledger;
pub mod payment;
pub mod server;
pub mod settlement;
pub mod store;
pub mod transport;
pub mod types;
