use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use super::Result;

const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// A token as returned by the processor's client-credentials exchange.
#[derive(Debug, Clone)]
pub struct FetchedToken {
    pub access_token: String,
    pub expires_in: Duration,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Process-wide cache for the processor's bearer token.
///
/// The token is fetched lazily on first use and again once it is within the
/// refresh margin of expiry. The slot mutex is held across the fetch, so
/// concurrent callers that find the cache empty wait for a single exchange
/// instead of each starting their own.
pub struct AccessTokenCache {
    slot: Mutex<Option<CachedToken>>,
    margin: Duration,
}

impl Default for AccessTokenCache {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH_MARGIN)
    }
}

impl AccessTokenCache {
    #[must_use]
    pub fn new(margin: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            margin,
        }
    }

    pub async fn get_or_refresh<F, Fut>(&self, fetch: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FetchedToken>>,
    {
        let mut slot = self.slot.lock().await;

        if let Some(cached) = slot.as_ref() {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.value.clone());
            }
        }

        let fetched = fetch().await?;
        let lifetime = if fetched.expires_in > self.margin {
            fetched.expires_in - self.margin
        } else {
            fetched.expires_in / 2
        };

        tracing::debug!(lifetime_secs = lifetime.as_secs(), "refreshed processor access token");

        *slot = Some(CachedToken {
            value: fetched.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });

        Ok(fetched.access_token)
    }

    /// Drops the cached token, e.g. after the processor rejected it.
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}
