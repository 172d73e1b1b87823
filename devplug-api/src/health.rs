//! Defines the interface custom health checks implement. Default
//! checks (e.g. "scheduler is running") are registered by the core
//! itself at init; plugin code can register additional checks of this
//! same shape before `serve` starts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckType {
    Periodic,
}

/// The most recently observed outcome of a health check.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckStatus {
    pub ts: DateTime<Utc>,
    pub ok: bool,
    pub message: Option<String>,
}

/// A single health check. Names must be unique within a plugin.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;
    fn check_type(&self) -> CheckType;

    /// How often the Health Manager should call `update`.
    fn interval(&self) -> std::time::Duration;

    /// Runs the check and records the outcome, which `status` then
    /// reports until the next `update`.
    async fn update(&self);

    /// The most recent outcome. Must not block or perform I/O --
    /// `update` is where the work happens.
    fn status(&self) -> CheckStatus;
}
