//! Defines the device model: identity, configuration, and the
//! transform chain applied to readings as they leave a device.

mod value;

pub use value::Value;

use crate::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// A device's stable identity. Derived deterministically (see
/// `devplugd::manager::derive_id`) from the plugin's configured
/// namespace and the device's configured data.
pub type Id = String;

/// The name of a registered [`crate::handler::DeviceHandler`].
pub type HandlerName = String;

/// A single entry of a device's transform chain. Exactly one operator
/// is carried per entry -- there is deliberately no "both" state.
#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    /// Looks up `name` in the handler-independent function registry
    /// and applies it to the raw value.
    Apply(String),
    /// Multiplies numeric values by `factor`.
    Scale(f64),
}

impl Transform {
    /// Applies this transform to `value`, looking up `Apply` names in
    /// `registry`. An unknown `Apply` name is a [`Error::Internal`]
    /// error rather than a silent pass-through, since a misconfigured
    /// transform chain should be loud.
    pub fn apply(
        &self,
        value: Value,
        registry: &TransformRegistry,
    ) -> Result<Value> {
        match self {
            Transform::Scale(factor) => Ok(value.scaled(*factor)),
            Transform::Apply(name) => match registry.get(name.as_str()) {
                Some(f) => Ok(f(value)),
                None => Err(Error::Internal(format!(
                    "no transform function named '{}'",
                    name
                ))),
            },
        }
    }
}

/// Maps a named transform function to its implementation. Plugin
/// authors populate this at startup; the core only ever looks names
/// up in it.
pub type TransformFn = fn(Value) -> Value;

#[derive(Clone, Default)]
pub struct TransformRegistry(HashMap<String, TransformFn>);

impl TransformRegistry {
    pub fn new() -> Self {
        TransformRegistry(HashMap::new())
    }

    pub fn register(&mut self, name: impl Into<String>, f: TransformFn) {
        self.0.insert(name.into(), f);
    }

    pub fn get(&self, name: &str) -> Option<TransformFn> {
        self.0.get(name).copied()
    }
}

/// A device instance, synthesized from a configured prototype and
/// instance overlay (see `devplugd::config::device`).
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: Id,
    pub r#type: String,
    pub info: Option<String>,
    pub tags: HashSet<String>,
    pub handler_name: HandlerName,
    pub data: toml::value::Table,
    pub output: Option<String>,
    pub sort_index: i32,
    pub alias: Option<String>,
    pub transforms: Vec<Transform>,
    pub context: HashMap<String, String>,
    pub write_timeout: Duration,
}

impl Device {
    /// The tag generated from the device's id, always present in
    /// `tags` (invariant ii, §3).
    pub fn id_tag(&self) -> String {
        self.id.clone()
    }

    /// The tag generated from the device's type, always present in
    /// `tags`.
    pub fn type_tag(&self) -> String {
        self.r#type.clone()
    }

    pub fn is_readable(&self, caps: Capabilities) -> bool {
        caps.read || caps.bulk_read
    }

    pub fn is_writable(&self, caps: Capabilities) -> bool {
        caps.write
    }

    pub fn is_listening(&self, caps: Capabilities) -> bool {
        caps.listen
    }
}

/// Declares which optional operations a [`crate::handler::DeviceHandler`]
/// implements. A capability-typed record, not an inheritance
/// hierarchy: the scheduler branches on the flags that are set rather
/// than on the handler's concrete type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub read: bool,
    pub bulk_read: bool,
    pub write: bool,
    pub listen: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_scale() {
        let registry = TransformRegistry::new();
        let t = Transform::Scale(2.0);

        assert_eq!(
            Value::Flt(4.0),
            t.apply(Value::Int(2), &registry).unwrap()
        );
    }

    #[test]
    fn test_transform_apply() {
        let mut registry = TransformRegistry::new();

        registry.register("negate", |v| match v {
            Value::Flt(v) => Value::Flt(-v),
            other => other,
        });

        let t = Transform::Apply("negate".into());

        assert_eq!(
            Value::Flt(-4.0),
            t.apply(Value::Flt(4.0), &registry).unwrap()
        );
    }

    #[test]
    fn test_transform_apply_unknown() {
        let registry = TransformRegistry::new();
        let t = Transform::Apply("nope".into());

        assert!(t.apply(Value::Int(1), &registry).is_err());
    }

    #[test]
    fn test_transform_chain_order() {
        // T1 = scale by 2, T2 = apply "negate". Raw value 3 should
        // become -6, i.e. T2(T1(raw)), not T1(T2(raw)).

        let mut registry = TransformRegistry::new();

        registry.register("negate", |v| match v {
            Value::Flt(v) => Value::Flt(-v),
            other => other,
        });

        let chain = vec![Transform::Scale(2.0), Transform::Apply("negate".into())];
        let mut value = Value::Int(3);

        for t in &chain {
            value = t.apply(value, &registry).unwrap();
        }

        assert_eq!(Value::Flt(-6.0), value);
    }
}
