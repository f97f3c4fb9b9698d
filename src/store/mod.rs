mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::types::*;

/// Store defines the database interface.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // User operations
    fn create_user(&self, user: &User) -> Result<()>;
    fn get_user(&self, id: &str) -> Result<Option<User>>;
    fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;
    fn update_user_token(&self, id: &str, encrypted_token: &str) -> Result<()>;

    // Repository operations
    fn create_repository(&self, repo: &Repository) -> Result<()>;
    fn get_repository(&self, id: &str) -> Result<Option<Repository>>;
    fn find_repository_by_url(&self, owner_id: &str, source_url: &str)
    -> Result<Option<Repository>>;
    fn list_user_repositories(&self, owner_id: &str) -> Result<Vec<Repository>>;
    fn list_transfers_of(&self, seller_repository_id: &str) -> Result<Vec<Repository>>;
    fn delete_repository(&self, id: &str) -> Result<bool>;

    /// Inserts a transferred repository and, when `intent_id` is set, marks
    /// the intent recorded in the same transaction. Returns the existing row
    /// when the intent was already recorded.
    fn record_transfer(&self, repo: &Repository, intent_id: Option<&str>) -> Result<Repository>;

    // Transfer intent operations
    fn create_intent(&self, intent: &TransferIntent) -> Result<()>;
    fn get_intent(&self, id: &str) -> Result<Option<TransferIntent>>;
    fn get_intent_by_authorization(&self, authorization_id: &str)
    -> Result<Option<TransferIntent>>;
    fn get_intent_by_order(&self, order_id: &str) -> Result<Option<TransferIntent>>;
    fn update_intent(&self, intent: &TransferIntent) -> Result<()>;
    fn list_intents_by_status(&self, status: IntentStatus) -> Result<Vec<TransferIntent>>;

    // Token operations
    fn create_token(&self, token: &Token) -> Result<()>;
    fn get_token_by_lookup(&self, lookup: &str) -> Result<Option<Token>>;
    fn update_token_last_used(&self, id: &str) -> Result<()>;
    fn has_admin_token(&self) -> Result<bool>;
}
