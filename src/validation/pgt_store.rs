//! Proxy-granting ticket store.
//!
//! Correlates the PGT-IOU carried in a validation response with the PGT the
//! CAS server delivered out-of-band to the proxy callback. Entries live for a
//! bounded retention window and are consumed on retrieval.
//!
//! The in-memory store also holds a bounded number of entries. Once full, the
//! cache's admission policy may refuse or evict a pair, and the matching
//! validation then yields an assertion without proxy capability (the same
//! outcome as an IOU that never arrived). Saves log a warning as the store
//! approaches its capacity.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, info, warn};
use moka::future::Cache;
use tokio::task::JoinHandle;

/// Default retention for uncorrelated entries.
pub const DEFAULT_PGT_RETENTION: Duration = Duration::from_secs(60);

/// Default upper bound on entries held at once.
pub const DEFAULT_MAX_PENDING_ENTRIES: u64 = 100_000;

/// Storage for proxy-granting tickets keyed by their IOU.
///
/// Implementations own their synchronization; `save` and `retrieve` may be
/// called concurrently from unrelated request handlers.
#[async_trait]
pub trait ProxyGrantingTicketStorage: Send + Sync {
    /// Store `pgt` under `iou`. Visible to `retrieve` once this returns,
    /// unless a bounded store had to drop it.
    async fn save(&self, iou: &str, pgt: &str);

    /// Take the PGT stored under `iou`, if any and not yet expired.
    async fn retrieve(&self, iou: &str) -> Option<String>;

    /// Purge expired entries.
    async fn clean_up(&self);
}

/// A stored IOU/PGT pair.
#[derive(Debug, Clone)]
pub struct ProxyGrantingTicketEntry {
    pub iou: String,
    pub pgt: String,
    /// When the callback delivered the pair.
    pub created_at: Instant,
}

/// In-memory store backed by a TTL cache with a capacity bound.
pub struct InMemoryProxyGrantingTicketStorage {
    cache: Cache<String, ProxyGrantingTicketEntry>,
    retention: Duration,
    max_entries: u64,
}

impl Default for InMemoryProxyGrantingTicketStorage {
    fn default() -> Self {
        Self::new(DEFAULT_PGT_RETENTION)
    }
}

impl InMemoryProxyGrantingTicketStorage {
    /// Store keeping entries for `retention`, bounded to
    /// [`DEFAULT_MAX_PENDING_ENTRIES`].
    pub fn new(retention: Duration) -> Self {
        Self::with_capacity(retention, DEFAULT_MAX_PENDING_ENTRIES)
    }

    /// Store holding at most `max_entries` pairs at once.
    pub fn with_capacity(retention: Duration, max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(retention)
            .build();

        Self {
            cache,
            retention,
            max_entries,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn capacity(&self) -> u64 {
        self.max_entries
    }

    /// Approximate number of live entries.
    pub fn pending(&self) -> u64 {
        self.cache.entry_count()
    }

    fn is_expired(&self, entry: &ProxyGrantingTicketEntry) -> bool {
        entry.created_at.elapsed() >= self.retention
    }

    /// At or above 90% of capacity.
    fn near_capacity(&self) -> bool {
        self.cache.entry_count().saturating_mul(10) >= self.max_entries.saturating_mul(9)
    }
}

#[async_trait]
impl ProxyGrantingTicketStorage for InMemoryProxyGrantingTicketStorage {
    async fn save(&self, iou: &str, pgt: &str) {
        let entry = ProxyGrantingTicketEntry {
            iou: iou.to_string(),
            pgt: pgt.to_string(),
            created_at: Instant::now(),
        };
        if self.near_capacity() {
            warn!(
                "Proxy-granting ticket store near capacity ({} of {} entries); IOU {} may be dropped",
                self.cache.entry_count(),
                self.max_entries,
                iou
            );
        } else {
            debug!("Saving proxy-granting ticket for IOU {}", iou);
        }
        self.cache.insert(entry.iou.clone(), entry).await;
    }

    async fn retrieve(&self, iou: &str) -> Option<String> {
        let entry = match self.cache.remove(iou).await {
            Some(entry) => entry,
            None => {
                debug!("No proxy-granting ticket found for IOU {}", iou);
                return None;
            }
        };

        if self.is_expired(&entry) {
            debug!("Proxy-granting ticket for IOU {} expired", iou);
            return None;
        }

        Some(entry.pgt)
    }

    async fn clean_up(&self) {
        self.cache.run_pending_tasks().await;
        debug!(
            "Proxy-granting ticket store cleaned up, {} entries pending",
            self.cache.entry_count()
        );
    }
}

/// Run `clean_up` on `storage` every `interval` until the task is aborted.
pub fn spawn_cleaner(
    storage: Arc<dyn ProxyGrantingTicketStorage>,
    interval: Duration,
) -> JoinHandle<()> {
    info!(
        "Starting proxy-granting ticket cleaner every {:?}",
        interval
    );
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            storage.clean_up().await;
        }
    })
}
