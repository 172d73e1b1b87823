//! Small fixture handlers used to exercise the runtime without real
//! hardware, analogous to the teacher's own built-in `memory`,
//! `latch`, and `cycle` drivers. Not part of the public API surface a
//! real plugin would build against -- only used by this crate's own
//! tests and integration tests.

use async_trait::async_trait;
use devplug_api::device::{Capabilities, Device, Value};
use devplug_api::{
    DeviceHandler, Error, ReadContext, ReadingSink, Reading, Result, WriteData,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Always reads the same fixed value for every device bound to it.
pub struct FixedValueHandler {
    name: String,
    value: Value,
}

impl FixedValueHandler {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        FixedValueHandler {
            name: name.into(),
            value,
        }
    }
}

#[async_trait]
impl DeviceHandler for FixedValueHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            read: true,
            ..Capabilities::default()
        }
    }

    async fn read(&self, device: &Device) -> Result<Vec<Reading>> {
        Ok(vec![Reading {
            device_id: device.id.clone(),
            ts: Utc::now(),
            r#type: device.r#type.clone(),
            value: self.value.clone(),
            unit: None,
            context: HashMap::new(),
        }])
    }
}

/// A read-only handler that always succeeds, used where a test only
/// cares that a read happened, not the value produced.
pub struct AlwaysOkReader {
    name: String,
    count: AtomicU32,
}

impl AlwaysOkReader {
    pub fn new(name: impl Into<String>) -> Self {
        AlwaysOkReader {
            name: name.into(),
            count: AtomicU32::new(0),
        }
    }

    pub fn invocations(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceHandler for AlwaysOkReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            read: true,
            ..Capabilities::default()
        }
    }

    async fn read(&self, device: &Device) -> Result<Vec<Reading>> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(vec![Reading {
            device_id: device.id.clone(),
            ts: Utc::now(),
            r#type: device.r#type.clone(),
            value: Value::Bool(true),
            unit: None,
            context: HashMap::new(),
        }])
    }
}

/// Produces one reading per device in a single `bulk_read` call.
pub struct BulkReader {
    name: String,
}

impl BulkReader {
    pub fn new(name: impl Into<String>) -> Self {
        BulkReader { name: name.into() }
    }
}

#[async_trait]
impl DeviceHandler for BulkReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            bulk_read: true,
            ..Capabilities::default()
        }
    }

    async fn bulk_read(&self, devices: &[Device]) -> Result<Vec<ReadContext>> {
        Ok(devices
            .iter()
            .map(|d| ReadContext {
                device_id: d.id.clone(),
                r#type: d.r#type.clone(),
                value: Value::Int(1),
                unit: None,
            })
            .collect())
    }
}

/// Accepts a write after a fixed delay and always succeeds.
pub struct DelayedNoopWriter {
    name: String,
    delay: Duration,
}

impl DelayedNoopWriter {
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        DelayedNoopWriter {
            name: name.into(),
            delay,
        }
    }
}

#[async_trait]
impl DeviceHandler for DelayedNoopWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            write: true,
            ..Capabilities::default()
        }
    }

    async fn write(&self, _device: &Device, _data: &WriteData) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

/// A write handler that always fails with a fixed message.
pub struct FailingWriter {
    name: String,
    message: String,
}

impl FailingWriter {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        FailingWriter {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl DeviceHandler for FailingWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            write: true,
            ..Capabilities::default()
        }
    }

    async fn write(&self, _device: &Device, _data: &WriteData) -> Result<()> {
        Err(Error::HandlerError(self.message.clone()))
    }
}

/// Pushes a fixed reading into its sink once, then blocks forever
/// (until cancelled by the scheduler dropping the task) -- used to
/// exercise the listener loop.
pub struct OnceListener {
    name: String,
    value: Value,
    fired: Mutex<bool>,
}

impl OnceListener {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        OnceListener {
            name: name.into(),
            value,
            fired: Mutex::new(false),
        }
    }
}

#[async_trait]
impl DeviceHandler for OnceListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            listen: true,
            ..Capabilities::default()
        }
    }

    async fn listen(&self, device: &Device, sink: ReadingSink) -> Result<()> {
        let mut fired = self.fired.lock().await;

        if !*fired {
            *fired = true;

            let _ = sink
                .send(Reading {
                    device_id: device.id.clone(),
                    ts: Utc::now(),
                    r#type: device.r#type.clone(),
                    value: self.value.clone(),
                    unit: None,
                    context: HashMap::new(),
                })
                .await;
        }

        std::future::pending::<()>().await;
        Ok(())
    }
}

pub fn arc<H: DeviceHandler + 'static>(handler: H) -> Arc<dyn DeviceHandler> {
    Arc::new(handler)
}
