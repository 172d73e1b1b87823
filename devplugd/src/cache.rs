//! The Reading Cache (§4.3): an optional, bounded FIFO of recent
//! readings with lazy TTL eviction.

use chrono::{DateTime, Utc};
use devplug_api::Reading;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

struct Inner {
    entries: VecDeque<(DateTime<Utc>, Reading)>,
}

/// Advisory only -- never the sole source of truth for a device's most
/// recent reading (the scheduler's `latest` map is). Eviction happens
/// lazily, on insert and on read (§4.3, §9).
#[derive(Clone)]
pub struct ReadingCache {
    inner: Arc<Mutex<Inner>>,
    ttl: Duration,
}

impl ReadingCache {
    pub fn new(ttl: Duration) -> Self {
        ReadingCache {
            inner: Arc::new(Mutex::new(Inner {
                entries: VecDeque::new(),
            })),
            ttl,
        }
    }

    fn evict_locked(inner: &mut Inner, ttl: Duration, now: DateTime<Utc>) {
        while let Some((ts, _)) = inner.entries.front() {
            if now.signed_duration_since(*ts).num_milliseconds() >= ttl.as_millis() as i64 {
                inner.entries.pop_front();
            } else {
                break;
            }
        }
    }

    pub async fn insert(&self, reading: Reading) {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;

        inner.entries.push_back((now, reading));
        Self::evict_locked(&mut inner, self.ttl, now);
    }

    /// Returns cached readings with `timestamp > since` whose device
    /// matches `tags` (caller resolves the tag query to a device-id
    /// set beforehand; this just filters against it).
    pub async fn get_since(
        &self,
        since: DateTime<Utc>,
        matching: &dyn Fn(&str) -> bool,
    ) -> Vec<Reading> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;

        Self::evict_locked(&mut inner, self.ttl, now);

        inner
            .entries
            .iter()
            .filter(|(ts, reading)| *ts > since && matching(&reading.device_id))
            .map(|(_, reading)| reading.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devplug_api::device::Value;
    use std::collections::HashMap;

    fn reading(device_id: &str) -> Reading {
        Reading {
            device_id: device_id.to_string(),
            ts: Utc::now(),
            r#type: "temperature".into(),
            value: Value::Int(1),
            unit: None,
            context: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_since() {
        let cache = ReadingCache::new(Duration::from_secs(60));
        let before = Utc::now() - chrono::Duration::milliseconds(1);

        cache.insert(reading("a")).await;

        let all = cache.get_since(before, &|_| true).await;

        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_eviction_on_ttl() {
        let cache = ReadingCache::new(Duration::from_millis(20));

        cache.insert(reading("a")).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_filters_by_predicate() {
        let cache = ReadingCache::new(Duration::from_secs(60));
        let before = Utc::now() - chrono::Duration::milliseconds(1);

        cache.insert(reading("a")).await;
        cache.insert(reading("b")).await;

        let matched = cache.get_since(before, &|id| id == "a").await;

        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].device_id, "a");
    }
}
