//! The Scheduler (§4.5): background read, write, and listener loops,
//! plus the single-consumer reading dispatcher that feeds the
//! `latest` map, the reading cache, and fan-out subscribers.

use crate::cache::ReadingCache;
use crate::config::plugin::{Mode, Settings};
use crate::limiter::RateLimiter;
use crate::manager::DeviceManager;
use crate::txstore::TransactionStore;
use chrono::Utc;
use devplug_api::device::{Device, Id, TransformRegistry, Value};
use devplug_api::{ReadContext, Reading, TransactionStatus, WriteData};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

struct WriteTask {
    device_id: Id,
    data: WriteData,
}

/// Handle to the running scheduler. Cloning shares the same
/// underlying state; every loop holds a clone of the pieces it needs
/// and exits when `cancel` fires.
#[derive(Clone)]
pub struct Scheduler {
    manager: Arc<DeviceManager>,
    registry: Arc<TransformRegistry>,
    limiter: RateLimiter,
    cache: Option<ReadingCache>,
    tx_store: TransactionStore,
    latest: Arc<Mutex<HashMap<Id, Reading>>>,
    reading_tx: mpsc::Sender<Reading>,
    write_tx: mpsc::Sender<WriteTask>,
    subscribers: Arc<Mutex<Vec<mpsc::Sender<Reading>>>>,
    settings: Arc<Settings>,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Wires the scheduler's internal channels and spawns every loop
    /// (§4.5.5: Plugin Core starts the scheduler after device manager
    /// init). `cancel` is the single cancellation signal Plugin Core
    /// propagates to every loop in the process (§5); the caller owns
    /// it and cancels it to begin shutdown. Returns the handle plus the
    /// join handles of the spawned tasks, so the core can await clean
    /// shutdown.
    pub fn start(
        manager: Arc<DeviceManager>,
        registry: Arc<TransformRegistry>,
        settings: Settings,
        tx_store: TransactionStore,
        cache: Option<ReadingCache>,
        cancel: CancellationToken,
    ) -> (Scheduler, Vec<JoinHandle<()>>) {
        let (reading_tx, reading_rx) = mpsc::channel(settings.read.queue_size);
        let (write_tx, write_rx) = mpsc::channel(settings.write.queue_size);
        let limiter = RateLimiter::new(settings.limiter.rate, settings.limiter.burst);

        let scheduler = Scheduler {
            manager,
            registry,
            limiter,
            cache,
            tx_store,
            latest: Arc::new(Mutex::new(HashMap::new())),
            reading_tx,
            write_tx,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            settings: Arc::new(settings),
            cancel,
        };

        let mut handles = Vec::new();

        handles.push(scheduler.clone().spawn_dispatcher(reading_rx));

        if !scheduler.settings.read.disable {
            handles.extend(scheduler.clone().spawn_read_loops());
        }
        if !scheduler.settings.write.disable {
            handles.push(scheduler.clone().spawn_write_loop(write_rx));
        }
        if !scheduler.settings.listen.disable {
            handles.extend(scheduler.clone().spawn_listener_loops());
        }

        (scheduler, handles)
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn latest(&self, id: &str) -> Option<Reading> {
        self.latest.lock().await.get(id).cloned()
    }

    pub async fn cached_since(
        &self,
        since: chrono::DateTime<Utc>,
        matching: &dyn Fn(&str) -> bool,
    ) -> Vec<Reading> {
        match &self.cache {
            Some(cache) => cache.get_since(since, matching).await,
            None => Vec::new(),
        }
    }

    /// Registers a new fan-out subscriber; readings produced after
    /// this call are forwarded until the receiver is dropped or its
    /// buffer fills (§4.5.4).
    pub async fn subscribe(&self, buffer: usize) -> mpsc::Receiver<Reading> {
        let (tx, rx) = mpsc::channel(buffer);

        self.subscribers.lock().await.push(tx);
        rx
    }

    /// Enqueues a write, returning its fresh transaction id. Blocks if
    /// the write queue is full (§5, backpressure).
    pub async fn enqueue_write(
        &self,
        device: &Device,
        mut data: WriteData,
    ) -> devplug_api::Result<String> {
        let tx_id = self.tx_store.create(device.id.clone()).await;
        data.transaction_id = tx_id.clone();
        let task = WriteTask {
            device_id: device.id.clone(),
            data,
        };

        self.write_tx.send(task).await.map_err(|_| {
            devplug_api::Error::Internal("write queue is closed".into())
        })?;
        Ok(tx_id)
    }

    pub fn transactions(&self) -> &TransactionStore {
        &self.tx_store
    }

    /// Performs an immediate, unscheduled read of a single device --
    /// used by the RPC `Read` path when the cache is disabled or
    /// doesn't have a fresh-enough entry (§4.6).
    pub async fn read_now(&self, device: &Device) -> devplug_api::Result<Vec<Reading>> {
        let handler = self
            .manager
            .handler(&device.handler_name)
            .ok_or_else(|| devplug_api::Error::UnknownHandler(device.handler_name.clone()))?
            .clone();

        let raw = tokio::time::timeout(self.settings.read.interval, handler.read(device))
            .await
            .map_err(|_| devplug_api::Error::Timeout)??;

        stamp_readings(device, raw, &self.registry)
    }

    fn spawn_dispatcher(self, mut reading_rx: mpsc::Receiver<Reading>) -> JoinHandle<()> {
        tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        reading = reading_rx.recv() => {
                            match reading {
                                Some(reading) => self.dispatch(reading).await,
                                None => break,
                            }
                        }
                    }
                }
            }
            .instrument(info_span!("reading_dispatcher")),
        )
    }

    async fn dispatch(&self, reading: Reading) {
        self.latest
            .lock()
            .await
            .insert(reading.device_id.clone(), reading.clone());

        if let Some(cache) = &self.cache {
            cache.insert(reading.clone()).await;
        }

        let mut subscribers = self.subscribers.lock().await;

        subscribers.retain_mut(|tx| match tx.try_send(reading.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("dropping fan-out subscriber: buffer full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    fn devices_by_handler(&self) -> HashMap<String, Vec<Device>> {
        let mut map: HashMap<String, Vec<Device>> = HashMap::new();

        for device in self.manager.all_devices() {
            map.entry(device.handler_name.clone())
                .or_default()
                .push(device.clone());
        }
        map
    }

    fn spawn_read_loops(self) -> Vec<JoinHandle<()>> {
        let groups = self.devices_by_handler();
        let readable: Vec<(String, Vec<Device>)> = groups
            .into_iter()
            .filter(|(name, _)| {
                self.manager
                    .handler_capabilities(name)
                    .map(|c| c.read || c.bulk_read)
                    .unwrap_or(false)
            })
            .collect();

        match self.settings.mode {
            Mode::Parallel => readable
                .into_iter()
                .map(|(name, devices)| {
                    let scheduler = self.clone();

                    tokio::spawn(
                        async move { scheduler.read_loop_body(name, devices).await }
                            .instrument(info_span!("read_loop")),
                    )
                })
                .collect(),
            Mode::Serial => {
                let scheduler = self.clone();

                vec![tokio::spawn(
                    async move {
                        loop {
                            if scheduler.cancel.is_cancelled() {
                                break;
                            }
                            for (name, devices) in &readable {
                                scheduler
                                    .read_tick(name, devices)
                                    .await;
                            }
                            tokio::select! {
                                _ = scheduler.cancel.cancelled() => break,
                                _ = tokio::time::sleep(scheduler.settings.read.interval) => {}
                            }
                        }
                    }
                    .instrument(info_span!("read_loop", mode = "serial")),
                )]
            }
        }
    }

    async fn read_loop_body(&self, handler_name: String, devices: Vec<Device>) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.read_tick(&handler_name, &devices).await;
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.read.interval) => {}
            }
        }
    }

    async fn read_tick(&self, handler_name: &str, devices: &[Device]) {
        let handler = match self.manager.handler(handler_name) {
            Some(h) => h.clone(),
            None => return,
        };
        let caps = handler.capabilities();
        let interval = self.settings.read.interval;

        if caps.bulk_read {
            match tokio::time::timeout(interval, handler.bulk_read(devices)).await {
                Ok(Ok(contexts)) => {
                    for ctx in contexts {
                        if let Some(device) = devices.iter().find(|d| d.id == ctx.device_id) {
                            if let Ok(reading) = stamp_bulk_reading(device, ctx, &self.registry) {
                                let _ = self.reading_tx.send(reading).await;
                            }
                        }
                    }
                }
                Ok(Err(e)) => warn!(handler = handler_name, error = %e, "bulk read failed"),
                Err(_) => warn!(handler = handler_name, "bulk read deadline exceeded"),
            }
            return;
        }

        if !caps.read {
            return;
        }

        for device in devices {
            if !self.limiter.acquire(interval).await {
                debug!(device = %device.id, "rate limiter acquire timed out, skipping tick");
                continue;
            }

            let dev = device.clone();
            let h = handler.clone();
            let join = tokio::spawn(async move {
                tokio::time::timeout(interval, h.read(&dev)).await
            });

            match join.await {
                Ok(Ok(Ok(readings))) => {
                    if let Ok(stamped) = stamp_readings(device, readings, &self.registry) {
                        for reading in stamped {
                            let _ = self.reading_tx.send(reading).await;
                        }
                    }
                }
                Ok(Ok(Err(e))) => warn!(device = %device.id, error = %e, "read failed"),
                Ok(Err(_)) => warn!(device = %device.id, "read deadline exceeded"),
                Err(_) => {
                    warn!(device = %device.id, "read handler panicked, cooling down");
                    tokio::time::sleep(interval).await;
                }
            }

            if let Some(delay) = self.settings.read.delay {
                tokio::time::sleep(delay).await;
            }
        }
    }

    fn spawn_write_loop(self, mut write_rx: mpsc::Receiver<WriteTask>) -> JoinHandle<()> {
        tokio::spawn(
            async move {
                loop {
                    if self.cancel.is_cancelled() {
                        break;
                    }

                    let mut batch = Vec::new();

                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        Some(task) = write_rx.recv() => batch.push(task),
                    }

                    while batch.len() < self.settings.write.batch_size {
                        match write_rx.try_recv() {
                            Ok(task) => batch.push(task),
                            Err(_) => break,
                        }
                    }

                    self.write_batch(batch).await;

                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.write.interval) => {}
                    }
                }
            }
            .instrument(info_span!("write_loop")),
        )
    }

    async fn write_batch(&self, batch: Vec<WriteTask>) {
        // Group by handler so parallel mode can run distinct handlers'
        // batches concurrently while keeping at most one write
        // in-flight per device (§4.5.2 invariants a, b).
        let mut by_handler: HashMap<String, Vec<WriteTask>> = HashMap::new();

        for task in batch {
            if let Some(device) = self.manager.get_device(&task.device_id) {
                by_handler
                    .entry(device.handler_name.clone())
                    .or_default()
                    .push(task);
            } else {
                warn!(device = %task.device_id, "write queued for unknown device");
            }
        }

        match self.settings.mode {
            Mode::Serial => {
                for (name, tasks) in by_handler {
                    self.write_handler_batch(&name, tasks).await;
                }
            }
            Mode::Parallel => {
                let futures: Vec<_> = by_handler
                    .into_iter()
                    .map(|(name, tasks)| {
                        let scheduler = self.clone();

                        tokio::spawn(async move {
                            scheduler.write_handler_batch(&name, tasks).await
                        })
                    })
                    .collect();

                for f in futures {
                    let _ = f.await;
                }
            }
        }
    }

    async fn write_handler_batch(&self, handler_name: &str, tasks: Vec<WriteTask>) {
        let handler = match self.manager.handler(handler_name) {
            Some(h) => h.clone(),
            None => return,
        };

        for task in tasks {
            let device = match self.manager.get_device(&task.device_id) {
                Some(d) => d.clone(),
                None => continue,
            };
            let tx_id = task.data.transaction_id.clone();

            let _ = self
                .tx_store
                .update(&tx_id, TransactionStatus::Writing, None)
                .await;

            if !self.limiter.acquire(device.write_timeout).await {
                let _ = self
                    .tx_store
                    .update(
                        &tx_id,
                        TransactionStatus::Error,
                        Some("rate limiter acquire timed out".into()),
                    )
                    .await;
                continue;
            }

            let result = tokio::time::timeout(device.write_timeout, handler.write(&device, &task.data)).await;

            match result {
                Ok(Ok(())) => {
                    let _ = self.tx_store.update(&tx_id, TransactionStatus::Done, None).await;
                }
                Ok(Err(e)) => {
                    let message = match &e {
                        devplug_api::Error::HandlerError(msg) => msg.clone(),
                        other => other.to_string(),
                    };
                    let _ = self
                        .tx_store
                        .update(&tx_id, TransactionStatus::Error, Some(message))
                        .await;
                }
                Err(_) => {
                    let _ = self
                        .tx_store
                        .update(&tx_id, TransactionStatus::Error, Some("write deadline exceeded".into()))
                        .await;
                }
            }

            if let Some(delay) = self.settings.write.delay {
                tokio::time::sleep(delay).await;
            }
        }
    }

    fn spawn_listener_loops(self) -> Vec<JoinHandle<()>> {
        self.manager
            .all_devices()
            .filter(|d| {
                self.manager
                    .handler_capabilities(&d.handler_name)
                    .map(|c| c.listen)
                    .unwrap_or(false)
            })
            .cloned()
            .map(|device| {
                let scheduler = self.clone();

                tokio::spawn(
                    async move { scheduler.listener_body(device).await }
                        .instrument(info_span!("listener")),
                )
            })
            .collect()
    }

    async fn listener_body(&self, device: Device) {
        const MIN_BACKOFF: Duration = Duration::from_secs(1);
        const MAX_BACKOFF: Duration = Duration::from_secs(30);

        let handler = match self.manager.handler(&device.handler_name) {
            Some(h) => h.clone(),
            None => return,
        };
        let mut backoff = MIN_BACKOFF;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let started = tokio::time::Instant::now();
            let result = handler.listen(&device, self.reading_tx.clone()).await;

            if let Err(e) = result {
                warn!(device = %device.id, error = %e, "listener exited with error");
            } else {
                info!(device = %device.id, "listener returned, restarting");
            }

            backoff = if started.elapsed() > MAX_BACKOFF {
                MIN_BACKOFF
            } else {
                (backoff * 2).min(MAX_BACKOFF)
            };

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }
}

fn stamp_readings(
    device: &Device,
    raw: Vec<Reading>,
    registry: &TransformRegistry,
) -> devplug_api::Result<Vec<Reading>> {
    raw.into_iter()
        .map(|mut reading| {
            let mut value = reading.value;

            for transform in &device.transforms {
                value = transform.apply(value, registry)?;
            }

            reading.value = value;
            reading.device_id = device.id.clone();
            reading.ts = Utc::now();
            reading.context = merge_context(&device.context, &reading.context);
            Ok(reading)
        })
        .collect()
}

fn stamp_bulk_reading(
    device: &Device,
    ctx: ReadContext,
    registry: &TransformRegistry,
) -> devplug_api::Result<Reading> {
    let mut value: Value = ctx.value;

    for transform in &device.transforms {
        value = transform.apply(value, registry)?;
    }

    Ok(Reading {
        device_id: ctx.device_id,
        ts: Utc::now(),
        r#type: ctx.r#type,
        value,
        unit: ctx.unit,
        context: device.context.clone(),
    })
}

fn merge_context(
    device_context: &HashMap<String, String>,
    reading_context: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut merged = device_context.clone();

    merged.extend(reading_context.clone());
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{AlwaysOkReader, BulkReader, FixedValueHandler};
    use devplug_api::device::{Capabilities, Transform};
    use std::sync::Arc as StdArc;

    fn device(id: &str, handler: &str) -> Device {
        Device {
            id: id.into(),
            r#type: "t".into(),
            info: None,
            tags: [id.to_string(), "t".to_string()].into_iter().collect(),
            handler_name: handler.into(),
            data: Default::default(),
            output: None,
            sort_index: 0,
            alias: None,
            transforms: vec![],
            context: Default::default(),
            write_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_read_tick_single_reader() {
        let mut manager = DeviceManager::new(vec!["ns".into()]);
        manager
            .add_handler(StdArc::new(FixedValueHandler::new("h", Value::Int(42))))
            .unwrap();

        let devices = vec![device("a", "h")];
        let settings = Settings::default();
        let scheduler_manager = StdArc::new(manager);
        let (scheduler, _handles) = Scheduler::start(
            scheduler_manager.clone(),
            StdArc::new(TransformRegistry::new()),
            settings,
            TransactionStore::new(Duration::from_secs(60)),
            None,
            CancellationToken::new(),
        );

        scheduler.read_tick("h", &devices).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let reading = scheduler.latest("a").await.unwrap();

        assert_eq!(reading.value, Value::Int(42));
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_bulk_read_tick_tags_each_device() {
        let mut manager = DeviceManager::new(vec!["ns".into()]);
        manager
            .add_handler(StdArc::new(BulkReader::new("h")))
            .unwrap();

        let devices = vec![device("a", "h"), device("b", "h")];
        let settings = Settings::default();
        let (scheduler, _handles) = Scheduler::start(
            StdArc::new(manager),
            StdArc::new(TransformRegistry::new()),
            settings,
            TransactionStore::new(Duration::from_secs(60)),
            None,
            CancellationToken::new(),
        );

        scheduler.read_tick("h", &devices).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(scheduler.latest("a").await.is_some());
        assert!(scheduler.latest("b").await.is_some());
        scheduler.stop();
    }

    #[test]
    fn test_stamp_readings_applies_transform_chain() {
        let mut d = device("a", "h");
        d.transforms = vec![Transform::Scale(2.0)];
        let registry = TransformRegistry::new();
        let raw = vec![Reading {
            device_id: "ignored".into(),
            ts: Utc::now(),
            r#type: "t".into(),
            value: Value::Int(3),
            unit: None,
            context: Default::default(),
        }];

        let stamped = stamp_readings(&d, raw, &registry).unwrap();

        assert_eq!(stamped[0].value, Value::Flt(6.0));
        assert_eq!(stamped[0].device_id, "a");
    }

    #[tokio::test]
    async fn test_always_ok_reader_capability_gate() {
        let reader = AlwaysOkReader::new("h");

        assert!(reader.capabilities() == Capabilities {
            read: true,
            bulk_read: false,
            write: false,
            listen: false,
        });
    }
}
