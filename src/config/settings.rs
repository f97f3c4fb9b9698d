use std::path::PathBuf;
use std::time::Duration;

use crate::types::DEFAULT_BRANCH;

pub const DEFAULT_CODE_HOST_API_URL: &str = "https://api.github.com";
pub const DEFAULT_CURRENCY: &str = "USD";
pub const DEFAULT_COMMIT_MESSAGE: &str = "Imported from a marketplace purchase";

/// Payment processor connection settings.
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub api_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub currency: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CodeHostConfig {
    pub api_url: String,
    pub timeout: Duration,
}

impl Default for CodeHostConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_CODE_HOST_API_URL.to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Tunables for snapshot migration.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub scratch_dir: PathBuf,
    /// Total push attempts, counting the first one. Only transient network
    /// failures are retried.
    pub push_attempts: u32,
    pub push_backoff: Duration,
    pub default_branch: String,
    pub commit_message: String,
}

impl TransferConfig {
    #[must_use]
    pub fn new(scratch_dir: PathBuf) -> Self {
        Self {
            scratch_dir,
            push_attempts: 3,
            push_backoff: Duration::from_secs(2),
            default_branch: DEFAULT_BRANCH.to_string(),
            commit_message: DEFAULT_COMMIT_MESSAGE.to_string(),
        }
    }
}

/// URLs the purchase flow redirects to.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Where the buyer's browser lands after each step.
    pub frontend_url: String,
    /// Externally reachable URL of this server, used for processor callbacks.
    pub public_base_url: String,
}

impl Settings {
    #[must_use]
    pub fn new(frontend_url: &str, public_base_url: &str) -> Self {
        Self {
            frontend_url: frontend_url.trim_end_matches('/').to_string(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn frontend(&self, path: &str) -> String {
        format!("{}{path}", self.frontend_url)
    }

    #[must_use]
    pub fn callback(&self, path: &str) -> String {
        format!("{}{path}", self.public_base_url)
    }
}
