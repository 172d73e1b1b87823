//! Configuration loading: search path resolution, environment-variable
//! overrides, and merging of the plugin and device documents (§6).

pub mod device;
pub mod plugin;

use devplug_api::{Error, Result};
pub use device::DeviceConfig;
pub use plugin::PluginConfig;
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;

const PLUGIN_CFG_FILE: &str = "plugin.yaml";
const DEVICE_CFG_FILE: &str = "devices.yaml";
const DEVICE_CFG_DIR: &str = "devices.d";

/// Directories searched, in order, for configuration files absent an
/// environment-variable override. Mirrors the teacher's own
/// `find_cfg` search path.
fn search_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from("./")];

    if let Ok(home) = env::var("HOME") {
        dirs.push(PathBuf::from(format!("{}/.", home)));
    }

    dirs.push(PathBuf::from("/usr/local/etc/"));
    dirs.push(PathBuf::from("/usr/pkg/etc/"));
    dirs.push(PathBuf::from("/etc/"));
    dirs
}

async fn read_yaml_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(contents) => serde_yaml::from_str(&contents)
            .map(Some)
            .map_err(|e| Error::ConfigInvalid(format!("{}: {}", path.display(), e))),
        Err(_) => Ok(None),
    }
}

/// Loads the plugin configuration. `PLUGIN_CONFIG`, if set, names a
/// file which takes precedence over the default search path.
pub async fn load_plugin_config() -> Result<PluginConfig> {
    if let Ok(path) = env::var("PLUGIN_CONFIG") {
        return match read_yaml_file::<PluginConfig>(Path::new(&path)).await? {
            Some(cfg) => validate_plugin(cfg),
            None => Err(Error::ConfigNotFound(path)),
        };
    }

    for dir in search_dirs() {
        let path = dir.join(PLUGIN_CFG_FILE);

        if let Some(cfg) = read_yaml_file::<PluginConfig>(&path).await? {
            return validate_plugin(cfg);
        }
    }

    validate_plugin(PluginConfig::default())
}

fn validate_plugin(cfg: PluginConfig) -> Result<PluginConfig> {
    if cfg.version != plugin::SUPPORTED_VERSION {
        return Err(Error::ConfigVersionUnsupported(cfg.version));
    }
    Ok(cfg)
}

/// Loads and merges the device configuration. `PLUGIN_DEVICE_CONFIG`,
/// if set, names a file or directory that wholly replaces the default
/// search path.
pub async fn load_device_config() -> Result<DeviceConfig> {
    if let Ok(path) = env::var("PLUGIN_DEVICE_CONFIG") {
        let path = PathBuf::from(path);
        let docs = if fs::metadata(&path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            load_dir(&path).await?
        } else {
            match read_yaml_file::<DeviceConfig>(&path).await? {
                Some(cfg) => vec![cfg],
                None => return Err(Error::ConfigNotFound(path.display().to_string())),
            }
        };
        return device::merge(docs).and_then(validate_devices);
    }

    let mut docs = Vec::new();

    for dir in search_dirs() {
        if let Some(cfg) = read_yaml_file::<DeviceConfig>(&dir.join(DEVICE_CFG_FILE)).await? {
            docs.push(cfg);
        }
        docs.extend(load_dir(&dir.join(DEVICE_CFG_DIR)).await?);
    }

    device::merge(docs).and_then(validate_devices)
}

fn validate_devices(cfg: DeviceConfig) -> Result<DeviceConfig> {
    if cfg.version != device::SUPPORTED_VERSION {
        return Err(Error::ConfigVersionUnsupported(cfg.version));
    }
    Ok(cfg)
}

async fn load_dir(dir: &Path) -> Result<Vec<DeviceConfig>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return Ok(Vec::new()),
    };
    let mut paths = Vec::new();

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();

        if path.extension().and_then(|e| e.to_str()) == Some("yaml") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut docs = Vec::new();

    for path in paths {
        if let Some(cfg) = read_yaml_file::<DeviceConfig>(&path).await? {
            docs.push(cfg);
        }
    }
    Ok(docs)
}

/// Applies environment-variable overrides to an already-parsed plugin
/// config. A variable `{prefix}_A_B=value` overrides the scalar at
/// YAML path `a.b`, following the dotted-lowercase derivation in §6.
pub fn apply_env_overrides(cfg: PluginConfig, prefix: &str) -> Result<PluginConfig> {
    let mut value = serde_yaml::to_value(&cfg)
        .map_err(|e| Error::Internal(format!("re-serializing config: {}", e)))?;
    let screaming_prefix = format!("{}_", prefix.to_uppercase());

    for (key, val) in env::vars() {
        if let Some(rest) = key.strip_prefix(&screaming_prefix) {
            let path: Vec<String> = rest.split('_').map(|s| s.to_lowercase()).collect();

            set_path(&mut value, &path, val);
        }
    }

    serde_yaml::from_value(value)
        .map_err(|e| Error::ConfigInvalid(format!("after env overrides: {}", e)))
}

fn set_path(root: &mut serde_yaml::Value, path: &[String], raw: String) {
    use serde_yaml::Value;

    if path.is_empty() {
        return;
    }

    if !root.is_mapping() {
        *root = Value::Mapping(Default::default());
    }

    let mapping = root.as_mapping_mut().expect("just ensured mapping");
    let key = Value::String(path[0].clone());

    if path.len() == 1 {
        mapping.insert(key, scalar(raw));
    } else {
        let entry = mapping
            .entry(key)
            .or_insert_with(|| Value::Mapping(Default::default()));

        set_path(entry, &path[1..], raw);
    }
}

fn scalar(raw: String) -> serde_yaml::Value {
    if let Ok(b) = raw.parse::<bool>() {
        return serde_yaml::Value::Bool(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return serde_yaml::Value::Number(i.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        return serde_yaml::Value::Number(f.into());
    }
    serde_yaml::Value::String(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_override_nested_bool() {
        let cfg = PluginConfig::default();

        std::env::set_var("TESTPLUG_SETTINGS_CACHE_ENABLED", "true");

        let overridden = apply_env_overrides(cfg, "TESTPLUG").unwrap();

        std::env::remove_var("TESTPLUG_SETTINGS_CACHE_ENABLED");

        assert!(overridden.settings.cache.enabled);
    }

    #[test]
    fn test_env_override_scalar() {
        let cfg = PluginConfig::default();

        std::env::set_var("TESTPLUG2_DEBUG", "true");

        let overridden = apply_env_overrides(cfg, "TESTPLUG2").unwrap();

        std::env::remove_var("TESTPLUG2_DEBUG");

        assert!(overridden.debug);
    }
}
