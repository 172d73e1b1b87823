//! The Transaction Store (§4.2): a TTL-scoped map of write-transaction
//! id to state, with a background sweeper evicting stale entries.

use chrono::Utc;
use devplug_api::device::Id;
use devplug_api::{Error, Result, Transaction, TransactionStatus};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

struct Inner {
    entries: HashMap<String, Transaction>,
}

/// Safe for concurrent access behind a single mutex -- transaction
/// churn is bounded by the write queue depth, so contention isn't a
/// concern (§4.2).
#[derive(Clone)]
pub struct TransactionStore {
    inner: Arc<Mutex<Inner>>,
    ttl: Duration,
}

impl TransactionStore {
    pub fn new(ttl: Duration) -> Self {
        TransactionStore {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
            })),
            ttl,
        }
    }

    pub async fn create(&self, device_id: Id) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let tx = Transaction::new(id.clone(), device_id, now);

        self.inner.lock().await.entries.insert(id.clone(), tx);
        id
    }

    pub async fn get(&self, id: &str) -> Result<Transaction> {
        self.inner
            .lock()
            .await
            .entries
            .get(id)
            .cloned()
            .ok_or(Error::NotFound)
    }

    pub async fn update(
        &self,
        id: &str,
        status: TransactionStatus,
        message: Option<String>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;

        match inner.entries.get_mut(id) {
            Some(tx) => {
                tx.transition(status, message, Utc::now());
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    pub async fn live_transactions(&self) -> Vec<Transaction> {
        self.inner.lock().await.entries.values().cloned().collect()
    }

    async fn sweep(&self) {
        let now = Utc::now();
        let ttl = self.ttl;
        let mut inner = self.inner.lock().await;
        let before = inner.entries.len();

        inner
            .entries
            .retain(|_, tx| now.signed_duration_since(tx.updated_at).num_milliseconds() < ttl.as_millis() as i64);

        let evicted = before - inner.entries.len();

        if evicted > 0 {
            debug!(evicted, "swept expired transactions");
        }
    }

    /// Evicts transactions older than `ttl` every `ttl / 2` until
    /// `cancel` fires. Intended to be spawned as its own task.
    pub async fn run_sweeper(self, cancel: CancellationToken) {
        let period = (self.ttl / 2).max(Duration::from_millis(50));
        let mut ticker = time::interval(period);

        async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => self.sweep().await,
                }
            }
        }
        .instrument(info_span!("txstore_sweeper"))
        .await
    }
}
