//! Decodes the device configuration document (§6): prototypes and the
//! instances overlaid on them.

use devplug_api::device::Transform;
use devplug_api::{Error, Result};
use serde_derive::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

fn def_version() -> i64 {
    1
}

fn def_write_timeout() -> Duration {
    Duration::from_secs(30)
}

pub const SUPPORTED_VERSION: i64 = 1;

/// One entry of a configured transform chain. Exactly one of `apply`
/// or `scale` must be set; see [`TransformCfg::into_transform`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransformCfg {
    pub apply: Option<String>,
    pub scale: Option<String>,
}

impl TransformCfg {
    pub fn into_transform(self) -> Result<Transform> {
        match (self.apply, self.scale) {
            (Some(name), None) => Ok(Transform::Apply(name)),
            (None, Some(factor)) => factor
                .parse::<f64>()
                .map(Transform::Scale)
                .map_err(|_| {
                    Error::ConfigInvalid(format!(
                        "'{}' is not a valid scale factor",
                        factor
                    ))
                }),
            (None, None) => {
                Err(Error::ConfigInvalid("transform has neither 'apply' nor 'scale'".into()))
            }
            (Some(_), Some(_)) => Err(Error::ConfigInvalid(
                "transform has both 'apply' and 'scale'".into(),
            )),
        }
    }
}

/// An alias is either a literal name or a template rendered against
/// the synthesized device's fields (`{id}`, `{type}`).
#[derive(Debug, Clone, Deserialize)]
pub struct AliasCfg {
    pub name: Option<String>,
    pub template: Option<String>,
}

impl AliasCfg {
    pub fn render(&self, id: &str, r#type: &str) -> Result<String> {
        match (&self.name, &self.template) {
            (Some(name), None) => Ok(name.clone()),
            (None, Some(template)) => {
                Ok(template.replace("{id}", id).replace("{type}", r#type))
            }
            (None, None) => Err(Error::ConfigInvalid(
                "alias has neither 'name' nor 'template'".into(),
            )),
            (Some(_), Some(_)) => Err(Error::ConfigInvalid(
                "alias has both 'name' and 'template'".into(),
            )),
        }
    }
}

/// Fields an instance can override on its prototype. Every field is
/// optional; an unset field inherits the prototype's value unless
/// `disable_inheritance` is set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Instance {
    pub info: Option<String>,
    pub tags: Option<Vec<String>>,
    pub data: Option<toml::value::Table>,
    pub output: Option<String>,
    #[serde(rename = "sortIndex")]
    pub sort_index: Option<i32>,
    pub handler: Option<String>,
    pub alias: Option<AliasCfg>,
    pub transforms: Option<Vec<TransformCfg>>,
    pub context: Option<HashMap<String, String>>,
    #[serde(rename = "writeTimeout", default, with = "humantime_serde::option")]
    pub write_timeout: Option<Duration>,
    #[serde(rename = "disableInheritance", default)]
    pub disable_inheritance: bool,
}

/// A device prototype: shared defaults plus the list of instances
/// derived from it.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceProto {
    pub r#type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub data: toml::value::Table,
    pub handler: String,
    #[serde(rename = "writeTimeout", default = "def_write_timeout", with = "humantime_serde")]
    pub write_timeout: Duration,
    #[serde(default)]
    pub context: HashMap<String, String>,
    #[serde(default)]
    pub transforms: Vec<TransformCfg>,
    #[serde(default)]
    pub instances: Vec<Instance>,
}

/// The device configuration document. One or more of these are merged
/// (§6, load rules: slice fields concatenate).
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "def_version")]
    pub version: i64,
    #[serde(default)]
    pub devices: Vec<DeviceProto>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            version: def_version(),
            devices: Vec::new(),
        }
    }
}

/// Concatenates the `devices` lists of several parsed documents.
/// Scalar top-level fields (`version`) are taken from the first
/// document; later documents' versions are ignored once validated to
/// match (mismatches are a configuration error the caller should
/// surface, not silently coerce).
pub fn merge(docs: Vec<DeviceConfig>) -> Result<DeviceConfig> {
    let mut iter = docs.into_iter();
    let mut merged = match iter.next() {
        Some(first) => first,
        None => return Ok(DeviceConfig::default()),
    };

    for doc in iter {
        if doc.version != merged.version {
            return Err(Error::ConfigInvalid(format!(
                "device config version mismatch: {} vs {}",
                merged.version, doc.version
            )));
        }
        merged.devices.extend(doc.devices);
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let yaml = r#"
version: 1
devices:
  - type: temperature
    handler: random_temp
    instances:
      - data: { id: "a" }
"#;
        let cfg: DeviceConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(cfg.devices.len(), 1);
        assert_eq!(cfg.devices[0].instances.len(), 1);
        assert_eq!(cfg.devices[0].write_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_transform_cfg_exactly_one() {
        assert!(TransformCfg {
            apply: Some("f".into()),
            scale: None
        }
        .into_transform()
        .is_ok());
        assert!(TransformCfg {
            apply: None,
            scale: Some("2.0".into())
        }
        .into_transform()
        .is_ok());
        assert!(TransformCfg {
            apply: None,
            scale: None
        }
        .into_transform()
        .is_err());
        assert!(TransformCfg {
            apply: Some("f".into()),
            scale: Some("2.0".into())
        }
        .into_transform()
        .is_err());
    }

    #[test]
    fn test_alias_template_render() {
        let alias = AliasCfg {
            name: None,
            template: Some("sensor-{id}-{type}".into()),
        };

        assert_eq!(
            alias.render("abc", "temperature").unwrap(),
            "sensor-abc-temperature"
        );
    }

    #[test]
    fn test_merge_concatenates_devices() {
        let a = DeviceConfig {
            version: 1,
            devices: vec![],
        };
        let mut proto = a.clone();
        proto.devices.push(DeviceProto {
            r#type: "t".into(),
            tags: vec![],
            data: Default::default(),
            handler: "h".into(),
            write_timeout: def_write_timeout(),
            context: Default::default(),
            transforms: vec![],
            instances: vec![],
        });

        let merged = merge(vec![a, proto]).unwrap();

        assert_eq!(merged.devices.len(), 1);
    }
}
