//! The RPC Service Surface (§4.6): a stateless adapter translating a
//! fixed set of operations into calls against the device manager, the
//! scheduler, and the health manager. Modeled as an internal async
//! trait plus a cloneable handle, the same shape as the teacher's own
//! `client::RequestChan` sitting in front of its (separately versioned)
//! wire contract -- there is no codec here, only the Rust surface a
//! codec would eventually sit behind.

use crate::health::HealthManager;
use crate::manager::DeviceManager;
use crate::scheduler::Scheduler;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use devplug_api::device::Device;
use devplug_api::{Error, Reading, Result, TagQuery, Transaction, WriteData};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Plugin-level identification returned by `Metadata`.
#[derive(Debug, Clone)]
pub struct Metadata {
    pub name: String,
    pub maintainer: String,
    pub description: String,
    pub version: String,
    pub tags: Vec<String>,
}

/// Build and SDK identification returned by `Version`.
#[derive(Debug, Clone)]
pub struct VersionInfo {
    pub plugin_version: String,
    pub sdk_version: String,
    pub build_info: String,
}

pub struct HealthReport {
    pub ts: DateTime<Utc>,
    pub ok: bool,
    pub checks: Vec<(String, devplug_api::CheckStatus)>,
}

/// The operations a plugin exposes to callers (§4.6). Every method
/// returning a `Vec`/`Receiver` resolves once the device/tag-query
/// filtering is done; streaming operations hand back a receiver the
/// caller drains at its own pace, and dropping it cancels production
/// server-side.
#[async_trait]
pub trait PluginService: Send + Sync {
    async fn test(&self) -> Result<()>;
    async fn metadata(&self) -> Metadata;
    async fn health(&self) -> HealthReport;
    async fn version(&self) -> VersionInfo;

    async fn devices(&self, query: TagQuery) -> Vec<Device>;

    /// Current readings for devices matching `query`. Serves from the
    /// cache when enabled; falls back to an immediate handler read
    /// otherwise (§4.6).
    async fn read(&self, query: TagQuery) -> Result<Vec<Reading>>;

    async fn read_cache(&self, start: DateTime<Utc>, end: DateTime<Utc>, query: TagQuery) -> Vec<Reading>;

    /// Subscribes to every reading produced from now on for devices
    /// matching `query` (§4.5.4 fan-out).
    async fn read_stream(&self, query: TagQuery, buffer: usize) -> mpsc::Receiver<Reading>;

    /// Enqueues one write per `WriteData`, returning their transaction
    /// ids in order.
    async fn write(&self, device_id: &str, writes: Vec<WriteData>) -> Result<Vec<String>>;

    /// Like `write`, but blocks on each transaction until it reaches a
    /// terminal state or `device.write_timeout` elapses.
    async fn write_sync(&self, device_id: &str, writes: Vec<WriteData>) -> Result<Vec<Transaction>>;

    async fn transaction(&self, id: &str) -> Result<Transaction>;
    async fn transactions(&self) -> Vec<Transaction>;
}

/// Implements [`PluginService`] directly against the core components --
/// no channel indirection is needed since the components are already
/// `Clone`/`Arc`-backed and safe to call concurrently.
pub struct Service {
    manager: Arc<DeviceManager>,
    scheduler: Scheduler,
    health: Arc<HealthManager>,
    metadata: Metadata,
    version: VersionInfo,
}

impl Service {
    pub fn new(
        manager: Arc<DeviceManager>,
        scheduler: Scheduler,
        health: Arc<HealthManager>,
        metadata: Metadata,
        version: VersionInfo,
    ) -> Self {
        Service {
            manager,
            scheduler,
            health,
            metadata,
            version,
        }
    }

    fn matching_devices(&self, query: &TagQuery) -> Vec<Device> {
        self.manager
            .get_devices_by_tag(query)
            .into_iter()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PluginService for Service {
    async fn test(&self) -> Result<()> {
        Ok(())
    }

    async fn metadata(&self) -> Metadata {
        self.metadata.clone()
    }

    async fn health(&self) -> HealthReport {
        let summary = self.health.status();

        HealthReport {
            ts: summary.ts,
            ok: summary.ok,
            checks: summary.checks,
        }
    }

    async fn version(&self) -> VersionInfo {
        self.version.clone()
    }

    async fn devices(&self, query: TagQuery) -> Vec<Device> {
        self.matching_devices(&query)
    }

    async fn read(&self, query: TagQuery) -> Result<Vec<Reading>> {
        let mut readings = Vec::new();

        for device in self.matching_devices(&query) {
            if let Some(reading) = self.scheduler.latest(&device.id).await {
                readings.push(reading);
                continue;
            }
            readings.extend(self.scheduler.read_now(&device).await?);
        }
        Ok(readings)
    }

    async fn read_cache(&self, start: DateTime<Utc>, _end: DateTime<Utc>, query: TagQuery) -> Vec<Reading> {
        let ids: std::collections::HashSet<String> = self
            .matching_devices(&query)
            .into_iter()
            .map(|d| d.id)
            .collect();

        self.scheduler
            .cached_since(start, &|id: &str| ids.contains(id))
            .await
    }

    async fn read_stream(&self, query: TagQuery, buffer: usize) -> mpsc::Receiver<Reading> {
        let ids: std::collections::HashSet<String> = self
            .matching_devices(&query)
            .into_iter()
            .map(|d| d.id)
            .collect();
        let mut upstream = self.scheduler.subscribe(buffer).await;
        let (tx, rx) = mpsc::channel(buffer);

        tokio::spawn(async move {
            while let Some(reading) = upstream.recv().await {
                if ids.is_empty() || ids.contains(&reading.device_id) {
                    if tx.send(reading).await.is_err() {
                        break;
                    }
                }
            }
        });
        rx
    }

    async fn write(&self, device_id: &str, writes: Vec<WriteData>) -> Result<Vec<String>> {
        let device = self
            .manager
            .get_device(device_id)
            .ok_or(Error::NotFound)?
            .clone();
        let caps = self
            .manager
            .handler_capabilities(&device.handler_name)
            .ok_or_else(|| Error::UnknownHandler(device.handler_name.clone()))?;

        if !device.is_writable(caps) {
            return Err(Error::UnsupportedCommand(format!(
                "device '{}' has no write capability",
                device_id
            )));
        }

        let mut ids = Vec::with_capacity(writes.len());

        for data in writes {
            ids.push(self.scheduler.enqueue_write(&device, data).await?);
        }
        Ok(ids)
    }

    async fn write_sync(&self, device_id: &str, writes: Vec<WriteData>) -> Result<Vec<Transaction>> {
        let device = self
            .manager
            .get_device(device_id)
            .ok_or(Error::NotFound)?
            .clone();
        let ids = self.write(device_id, writes).await?;
        let mut results = Vec::with_capacity(ids.len());

        for id in ids {
            results.push(await_terminal(self.scheduler.transactions(), &id, device.write_timeout).await?);
        }
        Ok(results)
    }

    async fn transaction(&self, id: &str) -> Result<Transaction> {
        self.scheduler.transactions().get(id).await
    }

    async fn transactions(&self) -> Vec<Transaction> {
        self.scheduler.transactions().live_transactions().await
    }
}

/// Polls a transaction until it reaches `Done`/`Error` or `deadline`
/// elapses. There's no push notification out of the transaction store,
/// so `WriteSync` polls it on a short interval -- acceptable since
/// transaction churn is bounded (§5).
async fn await_terminal(
    store: &crate::txstore::TransactionStore,
    id: &str,
    deadline: Duration,
) -> Result<Transaction> {
    use devplug_api::TransactionStatus;

    timeout(deadline, async {
        loop {
            let tx = store.get(id).await?;

            if matches!(tx.status, TransactionStatus::Done | TransactionStatus::Error) {
                return Ok(tx);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .map_err(|_| Error::Timeout)?
}

/// A cloneable front door to a [`PluginService`], mirroring the
/// teacher's `RequestChan` pattern so a wire-level server could be
/// bolted on without touching the service implementation. Since the
/// service itself is already cheap to clone, the handle is a thin
/// `Arc` wrapper rather than a channel -- there's no blocking internal
/// state to serialize access to.
#[derive(Clone)]
pub struct RpcHandle {
    service: Arc<dyn PluginService>,
}

impl RpcHandle {
    pub fn new(service: Arc<dyn PluginService>) -> Self {
        RpcHandle { service }
    }
}

impl std::ops::Deref for RpcHandle {
    type Target = dyn PluginService;

    fn deref(&self) -> &Self::Target {
        self.service.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::plugin::Settings;
    use crate::testutil::{arc, FixedValueHandler};
    use crate::txstore::TransactionStore;
    use devplug_api::device::{TransformRegistry, Value};
    use std::time::Duration as StdDuration;
    use tokio_util::sync::CancellationToken;

    async fn service_with_no_devices() -> (RpcHandle, Scheduler) {
        let mut manager = DeviceManager::new(vec!["ns".into()]);

        manager
            .add_handler(arc(FixedValueHandler::new("h", Value::Int(7))))
            .unwrap();

        let manager = Arc::new(manager);
        let (scheduler, _handles) = Scheduler::start(
            manager.clone(),
            Arc::new(TransformRegistry::new()),
            Settings::default(),
            TransactionStore::new(StdDuration::from_secs(60)),
            None,
            CancellationToken::new(),
        );
        let health = Arc::new(HealthManager::new(vec![], true));
        let metadata = Metadata {
            name: "test".into(),
            maintainer: "nobody".into(),
            description: "".into(),
            version: "0.0.0".into(),
            tags: vec![],
        };
        let version = VersionInfo {
            plugin_version: "0.0.0".into(),
            sdk_version: "0.0.0".into(),
            build_info: "test".into(),
        };
        let service = Service::new(manager, scheduler.clone(), health, metadata, version);

        (RpcHandle::new(Arc::new(service)), scheduler)
    }

    #[tokio::test]
    async fn test_test_op_always_ok() {
        let (handle, scheduler) = service_with_no_devices().await;

        assert!(handle.test().await.is_ok());
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_write_unknown_device_not_found() {
        let (handle, scheduler) = service_with_no_devices().await;

        let err = handle.write("missing", vec![]).await.unwrap_err();

        assert!(matches!(err, Error::NotFound));
        scheduler.stop();
    }
}
