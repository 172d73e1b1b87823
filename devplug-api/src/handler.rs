//! Defines the interface a device handler implements to service one
//! or more devices, and the setup-action hook run once before the
//! scheduler starts.

use crate::{
    device::{Capabilities, Device},
    reading::{ReadContext, Reading},
    tag_query::TagQuery,
    write::WriteData,
    Error, Result,
};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;

/// The handle `DeviceHandler::listen` uses to push readings into the
/// scheduler's reading queue as they arrive, for as long as the
/// listener task runs.
pub type ReadingSink = mpsc::Sender<Reading>;

/// All device handlers implement this trait. Capability presence is a
/// flag on a plain record (see [`Capabilities`]), not a marker trait
/// or inheritance hierarchy -- the scheduler checks `capabilities()`
/// to decide which of the four methods below it's allowed to call for
/// a given device, and the default method bodies only exist so a
/// handler need only override the ones its capabilities claim.
#[async_trait]
pub trait DeviceHandler: Send + Sync {
    /// A short, unique name. Devices reference handlers by this name.
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Reads a single device. Only called if `capabilities().read` is
    /// set.
    async fn read(&self, device: &Device) -> Result<Vec<Reading>> {
        let _ = device;
        Err(Error::UnsupportedCommand(format!(
            "handler '{}' has no read capability",
            self.name()
        )))
    }

    /// Reads every device bound to this handler in one call. Only
    /// called if `capabilities().bulk_read` is set; when both `read`
    /// and `bulk_read` are set, the scheduler always prefers
    /// `bulk_read` (§4.5.1).
    async fn bulk_read(&self, devices: &[Device]) -> Result<Vec<ReadContext>> {
        let _ = devices;
        Err(Error::UnsupportedCommand(format!(
            "handler '{}' has no bulk-read capability",
            self.name()
        )))
    }

    /// Applies a write to a single device. Only called if
    /// `capabilities().write` is set.
    async fn write(&self, device: &Device, data: &WriteData) -> Result<()> {
        let _ = (device, data);
        Err(Error::UnsupportedCommand(format!(
            "handler '{}' has no write capability",
            self.name()
        )))
    }

    /// Runs for as long as the plugin is serving, pushing readings
    /// into `sink` as they arrive. Only called if
    /// `capabilities().listen` is set. Returning (`Ok` or `Err`)
    /// signals the scheduler to restart the listener after a backoff
    /// (§4.5.3).
    async fn listen(&self, device: &Device, sink: ReadingSink) -> Result<()> {
        let _ = (device, sink);
        Err(Error::UnsupportedCommand(format!(
            "handler '{}' has no listen capability",
            self.name()
        )))
    }

    /// Named setup actions this handler wants run, once, before the
    /// scheduler starts serving (§4.1). Most handlers have none.
    fn actions(&self) -> Vec<SetupAction> {
        Vec::new()
    }
}

pub type ActionFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
pub type SetupActionFn = Box<dyn Fn(Vec<Device>) -> ActionFuture + Send + Sync>;

/// A named function executed once, serially, against a filtered
/// device set before the scheduler starts.
pub struct SetupAction {
    pub name: String,
    pub filter: TagQuery,
    /// If `true`, a failure aborts the run instead of being collected
    /// into the setup-phase `MultiError`.
    pub fatal: bool,
    pub run: SetupActionFn,
}

impl SetupAction {
    pub fn new(
        name: impl Into<String>,
        filter: TagQuery,
        fatal: bool,
        run: SetupActionFn,
    ) -> Self {
        SetupAction {
            name: name.into(),
            filter,
            fatal,
            run,
        }
    }
}
