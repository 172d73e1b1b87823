//! Decodes the plugin configuration document (§6): runtime mode,
//! queue sizes, the rate limiter, the cache, the network endpoint the
//! RPC surface binds to, dynamic device registration, and health.

use serde_derive::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

fn def_version() -> i64 {
    1
}

fn def_true() -> bool {
    true
}

fn def_mode() -> Mode {
    Mode::Serial
}

fn def_queue_size() -> usize {
    128
}

fn def_read_interval() -> Duration {
    Duration::from_secs(1)
}

fn def_write_interval() -> Duration {
    Duration::from_secs(1)
}

fn def_batch_size() -> usize {
    128
}

fn def_tx_ttl() -> Duration {
    Duration::from_secs(5 * 60)
}

fn def_cache_ttl() -> Duration {
    Duration::from_secs(3 * 60)
}

fn def_health_interval() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Serial,
    Parallel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdConfig {
    #[serde(default)]
    pub use_machine_id: bool,
    #[serde(default)]
    pub use_plugin_tag: bool,
    #[serde(default)]
    pub use_env: Vec<String>,
    #[serde(default)]
    pub use_custom: Vec<String>,
}

impl Default for IdConfig {
    fn default() -> Self {
        IdConfig {
            use_machine_id: false,
            use_plugin_tag: false,
            use_env: Vec::new(),
            use_custom: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig { enabled: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenSettings {
    #[serde(default)]
    pub disable: bool,
    #[serde(default = "def_queue_size")]
    pub queue_size: usize,
}

impl Default for ListenSettings {
    fn default() -> Self {
        ListenSettings {
            disable: false,
            queue_size: def_queue_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadSettings {
    #[serde(default)]
    pub disable: bool,
    #[serde(default = "def_read_interval", with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default, with = "humantime_serde::option")]
    pub delay: Option<Duration>,
    #[serde(default = "def_queue_size")]
    pub queue_size: usize,
}

impl Default for ReadSettings {
    fn default() -> Self {
        ReadSettings {
            disable: false,
            interval: def_read_interval(),
            delay: None,
            queue_size: def_queue_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteSettings {
    #[serde(default)]
    pub disable: bool,
    #[serde(default = "def_write_interval", with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default, with = "humantime_serde::option")]
    pub delay: Option<Duration>,
    #[serde(default = "def_queue_size")]
    pub queue_size: usize,
    #[serde(default = "def_batch_size")]
    pub batch_size: usize,
}

impl Default for WriteSettings {
    fn default() -> Self {
        WriteSettings {
            disable: false,
            interval: def_write_interval(),
            delay: None,
            queue_size: def_queue_size(),
            batch_size: def_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionSettings {
    #[serde(default = "def_tx_ttl", with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for TransactionSettings {
    fn default() -> Self {
        TransactionSettings { ttl: def_tx_ttl() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterSettings {
    /// Tokens per second. `0` means unlimited.
    #[serde(default)]
    pub rate: u32,
    /// Bucket capacity. `0` defaults to `rate`.
    #[serde(default)]
    pub burst: u32,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        LimiterSettings { rate: 0, burst: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "def_cache_ttl", with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            enabled: false,
            ttl: def_cache_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "def_mode")]
    pub mode: Mode,
    #[serde(default)]
    pub listen: ListenSettings,
    #[serde(default)]
    pub read: ReadSettings,
    #[serde(default)]
    pub write: WriteSettings,
    #[serde(default)]
    pub transaction: TransactionSettings,
    #[serde(default)]
    pub limiter: LimiterSettings,
    #[serde(default)]
    pub cache: CacheSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            mode: def_mode(),
            listen: ListenSettings::default(),
            read: ReadSettings::default(),
            write: WriteSettings::default(),
            transaction: TransactionSettings::default(),
            limiter: LimiterSettings::default(),
            cache: CacheSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Tcp,
    Unix,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    #[serde(default, rename = "caCerts")]
    pub ca_certs: Vec<PathBuf>,
    #[serde(default, rename = "skipVerify")]
    pub skip_verify: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub r#type: NetworkType,
    pub address: String,
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicRegistration {
    #[serde(default)]
    pub config: Vec<toml::value::Table>,
}

impl Default for DynamicRegistration {
    fn default() -> Self {
        DynamicRegistration { config: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthChecksConfig {
    #[serde(default)]
    pub disable_defaults: bool,
}

impl Default for HealthChecksConfig {
    fn default() -> Self {
        HealthChecksConfig {
            disable_defaults: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthConfig {
    pub health_file: Option<PathBuf>,
    #[serde(default = "def_health_interval", with = "humantime_serde")]
    pub update_interval: Duration,
    #[serde(default)]
    pub checks: HealthChecksConfig,
}

impl Default for HealthConfig {
    fn default() -> Self {
        HealthConfig {
            health_file: None,
            update_interval: def_health_interval(),
            checks: HealthChecksConfig::default(),
        }
    }
}

/// The plugin configuration document (§6, top-level YAML type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    #[serde(default = "def_version")]
    pub version: i64,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub id: IdConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub settings: Settings,
    pub network: Option<NetworkConfig>,
    #[serde(default, rename = "dynamicRegistration")]
    pub dynamic_registration: DynamicRegistration,
    #[serde(default)]
    pub health: HealthConfig,
    /// Abort startup if no devices load successfully.
    #[serde(default = "def_true", rename = "requireDevices")]
    pub require_devices: bool,
}

impl Default for PluginConfig {
    fn default() -> Self {
        PluginConfig {
            version: def_version(),
            debug: false,
            id: IdConfig::default(),
            metrics: MetricsConfig::default(),
            settings: Settings::default(),
            network: None,
            dynamic_registration: DynamicRegistration::default(),
            health: HealthConfig::default(),
            require_devices: true,
        }
    }
}

// Only `version: 1` documents are understood; reject anything else
// rather than silently misinterpreting a future schema.
pub const SUPPORTED_VERSION: i64 = 1;
