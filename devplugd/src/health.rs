//! The Health Manager (§4.7): periodic checks, an aggregated summary,
//! and the health-signal file.

use chrono::{DateTime, Utc};
use devplug_api::{CheckStatus, CheckType, HealthCheck};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, warn, Instrument};

/// A default check registered by the framework itself, unless the
/// configuration disables defaults (§4.7, `health.checks.disableDefaults`).
/// Reports OK unconditionally -- its purpose is to give `Status()` at
/// least one entry even when a plugin registers no custom checks.
pub struct AliveCheck {
    interval: Duration,
}

impl AliveCheck {
    pub fn new(interval: Duration) -> Self {
        AliveCheck { interval }
    }
}

#[async_trait::async_trait]
impl HealthCheck for AliveCheck {
    fn name(&self) -> &str {
        "alive"
    }

    fn check_type(&self) -> CheckType {
        CheckType::Periodic
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn update(&self) {}

    fn status(&self) -> CheckStatus {
        CheckStatus {
            ts: Utc::now(),
            ok: true,
            message: None,
        }
    }
}

pub struct HealthSummary {
    pub ts: DateTime<Utc>,
    pub ok: bool,
    pub checks: Vec<(String, CheckStatus)>,
}

pub struct HealthManager {
    checks: Vec<Arc<dyn HealthCheck>>,
}

impl HealthManager {
    pub fn new(custom: Vec<Arc<dyn HealthCheck>>, disable_defaults: bool) -> Self {
        let mut checks = if disable_defaults {
            Vec::new()
        } else {
            vec![Arc::new(AliveCheck::new(Duration::from_secs(30))) as Arc<dyn HealthCheck>]
        };

        checks.extend(custom);
        HealthManager { checks }
    }

    pub fn status(&self) -> HealthSummary {
        let checks: Vec<(String, CheckStatus)> = self
            .checks
            .iter()
            .map(|c| (c.name().to_string(), c.status()))
            .collect();
        let ok = checks.iter().all(|(_, s)| s.ok);

        HealthSummary {
            ts: Utc::now(),
            ok,
            checks,
        }
    }

    /// Spawns one task per check, running `update` on its own
    /// interval, plus the health-file writer if `health_file` is
    /// configured.
    pub fn spawn(
        self: Arc<Self>,
        health_file: Option<PathBuf>,
        file_update_interval: Duration,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        for check in &self.checks {
            let check = check.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(
                async move {
                    let mut ticker = tokio::time::interval(check.interval());

                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = ticker.tick() => check.update().await,
                        }
                    }
                }
                .instrument(info_span!("health_check")),
            ));
        }

        if let Some(path) = health_file {
            let manager = self.clone();

            handles.push(tokio::spawn(
                async move {
                    let mut ticker = tokio::time::interval(file_update_interval);

                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = ticker.tick() => {
                                let summary = manager.status();

                                if let Err(e) = write_signal(&path, summary.ok).await {
                                    warn!(error = %e, "failed to update health signal file");
                                }
                            }
                        }
                    }
                }
                .instrument(info_span!("health_file_writer")),
            ));
        }

        handles
    }
}

/// Writes "ok" to `path` when healthy, removes it otherwise. The
/// write is atomic (write to a sibling temp file, then rename).
async fn write_signal(path: &Path, ok: bool) -> std::io::Result<()> {
    if ok {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension("tmp");

        fs::write(&tmp, b"ok").await?;
        fs::rename(&tmp, path).await
    } else {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devplug_api::Result;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlipCheck {
        ok: AtomicBool,
    }

    #[async_trait::async_trait]
    impl HealthCheck for FlipCheck {
        fn name(&self) -> &str {
            "flip"
        }
        fn check_type(&self) -> CheckType {
            CheckType::Periodic
        }
        fn interval(&self) -> Duration {
            Duration::from_millis(20)
        }
        async fn update(&self) {
            self.ok.fetch_xor(true, Ordering::SeqCst);
        }
        fn status(&self) -> CheckStatus {
            CheckStatus {
                ts: Utc::now(),
                ok: self.ok.load(Ordering::SeqCst),
                message: None,
            }
        }
    }

    #[test]
    fn test_status_ok_when_all_checks_ok() {
        let manager = HealthManager::new(vec![], false);

        assert!(manager.status().ok);
    }

    #[test]
    fn test_status_not_ok_when_any_check_fails() {
        let failing = Arc::new(FlipCheck {
            ok: AtomicBool::new(false),
        });
        let manager = HealthManager::new(vec![failing], false);

        assert!(!manager.status().ok);
    }

    #[tokio::test]
    async fn test_health_file_written_then_removed() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("devplugd-health-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("health");

        write_signal(&path, true).await.unwrap();
        assert!(tokio::fs::metadata(&path).await.is_ok());

        write_signal(&path, false).await.unwrap();
        assert!(tokio::fs::metadata(&path).await.is_err());

        let _ = tokio::fs::remove_dir_all(&dir).await;
        Ok(())
    }
}
