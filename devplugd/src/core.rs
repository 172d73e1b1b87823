//! Plugin Core (§4.1 `ExecSetupActions`, §5 lifecycle): wires the
//! device manager, scheduler, transaction store, reading cache, health
//! manager, and RPC service surface together, runs setup actions once
//! before serving, and propagates a single cancellation signal through
//! shutdown, the same lifecycle shape the teacher's own `core::start`
//! wires drivers and the request channel together around.

use crate::cache::ReadingCache;
use crate::config::plugin::PluginConfig;
use crate::health::HealthManager;
use crate::manager::DeviceManager;
use crate::rpc::{Metadata, RpcHandle, Service, VersionInfo};
use crate::scheduler::Scheduler;
use crate::txstore::TransactionStore;
use devplug_api::device::TransformRegistry;
use devplug_api::{HealthCheck, MultiError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

/// How long shutdown waits for in-flight handler calls before
/// abandoning their tasks (§5).
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Everything a plugin author assembles before calling `serve`: a
/// device manager with handlers already registered and device
/// configuration already loaded, the transform registry those devices'
/// `apply` entries resolve against, any custom health checks, and the
/// identification `Metadata`/`Version` report.
pub struct Plugin {
    pub manager: DeviceManager,
    pub registry: TransformRegistry,
    pub health_checks: Vec<Arc<dyn HealthCheck>>,
    pub metadata: Metadata,
    pub version: VersionInfo,
}

/// A plugin that has completed setup and is actively serving. Dropping
/// this without calling `shutdown` leaves the background tasks
/// running; `shutdown` is the only sanctioned way to stop them.
pub struct Running {
    pub rpc: RpcHandle,
    scheduler: Scheduler,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Plugin {
    /// Runs every registered handler's setup actions, serially, against
    /// the device set each action's filter resolves to (§4.1). A
    /// `fatal` action's failure aborts immediately; a non-fatal
    /// failure is recorded and the remaining actions still run.
    async fn run_setup_actions(&self) -> std::result::Result<(), MultiError> {
        let mut errors = MultiError::new();

        for handler in self.manager.handlers() {
            for action in handler.actions() {
                let devices: Vec<_> = self
                    .manager
                    .get_devices_by_tag(&action.filter)
                    .into_iter()
                    .cloned()
                    .collect();
                let label = action.name.clone();

                if let Err(e) = (action.run)(devices)
                    .instrument(info_span!("setup_action", name = %label))
                    .await
                {
                    if action.fatal {
                        errors.push(label, e);
                        return Err(errors);
                    }
                    errors.push(label, e);
                }
            }
        }

        errors.into_result()
    }

    /// Runs setup actions, then starts the scheduler, transaction
    /// sweeper, health manager, and RPC service surface. Returns once
    /// every background task has been spawned; it does not block for
    /// the plugin's lifetime (callers await shutdown separately).
    pub async fn serve(self, config: PluginConfig) -> Result<Running> {
        self.run_setup_actions()
            .await
            .map_err(|errors| devplug_api::Error::Internal(errors.to_string()))?;

        let manager = Arc::new(self.manager);
        let registry = Arc::new(self.registry);
        let cancel = CancellationToken::new();

        let tx_store = TransactionStore::new(config.settings.transaction.ttl);
        let cache = config
            .settings
            .cache
            .enabled
            .then(|| ReadingCache::new(config.settings.cache.ttl));

        let sweeper_store = tx_store.clone();
        let (scheduler, mut handles) = Scheduler::start(
            manager.clone(),
            registry,
            config.settings.clone(),
            tx_store,
            cache,
            cancel.clone(),
        );

        handles.push(tokio::spawn(sweeper_store.run_sweeper(cancel.clone())));

        let health = Arc::new(HealthManager::new(
            self.health_checks,
            config.health.checks.disable_defaults,
        ));

        handles.extend(health.clone().spawn(
            config.health.health_file.clone(),
            config.health.update_interval,
            cancel.clone(),
        ));

        let service = Service::new(
            manager,
            scheduler.clone(),
            health,
            self.metadata,
            self.version,
        );
        let rpc = RpcHandle::new(Arc::new(service));

        info!("plugin serving");

        Ok(Running {
            rpc,
            scheduler,
            cancel,
            handles,
        })
    }
}

impl Running {
    /// Cancels every loop and waits up to the shutdown grace period for
    /// them to drain their current iteration. Tasks still running
    /// after the grace period are abandoned with a warning (§5).
    pub async fn shutdown(self) {
        self.scheduler.stop();
        self.cancel.cancel();

        let joined = tokio::time::timeout(
            SHUTDOWN_GRACE,
            futures::future::join_all(self.handles),
        )
        .await;

        if joined.is_err() {
            warn!("shutdown grace period elapsed, abandoning remaining tasks");
        }
    }
}
