//! The Device Manager (§4.1): owns the handler table and the device
//! set, synthesizes devices from (prototype, instance) pairs, and
//! maintains the tag index.

use crate::config::device::{DeviceConfig, DeviceProto, Instance};
use crate::id::derive_id;
use devplug_api::device::{Capabilities, Device, Transform};
use devplug_api::{DeviceHandler, Error, MultiError, Result, TagQuery};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Maps tags to the set of device ids carrying them.
#[derive(Default)]
pub struct TagIndex {
    by_tag: HashMap<String, HashSet<String>>,
}

impl TagIndex {
    pub fn new() -> Self {
        TagIndex::default()
    }

    fn insert(&mut self, id: &str, tags: &HashSet<String>) {
        for tag in tags {
            self.by_tag
                .entry(tag.clone())
                .or_default()
                .insert(id.to_string());
        }
    }

    /// Resolves a tag query (OR of ANDed groups) to the set of
    /// matching device ids. An empty query matches all of `universe`.
    pub fn resolve(&self, query: &TagQuery, universe: &HashSet<String>) -> HashSet<String> {
        if query.0.is_empty() {
            return universe.clone();
        }

        let mut result = HashSet::new();

        for group in &query.0 {
            let mut group_set: Option<HashSet<String>> = None;

            for tag in group {
                let tagged = self.by_tag.get(tag).cloned().unwrap_or_default();

                group_set = Some(match group_set {
                    Some(acc) => acc.intersection(&tagged).cloned().collect(),
                    None => tagged,
                });
            }

            if let Some(group_set) = group_set {
                result.extend(group_set);
            }
        }

        result
    }
}

/// Owns every registered handler and every constructed device.
pub struct DeviceManager {
    handlers: HashMap<String, Arc<dyn DeviceHandler>>,
    devices: HashMap<String, Device>,
    aliases: HashMap<String, String>,
    tag_index: TagIndex,
    /// Namespace components hashed together with a device's `data`
    /// table to derive its id (§3, §9).
    namespace: Vec<String>,
}

impl DeviceManager {
    pub fn new(namespace: Vec<String>) -> Self {
        DeviceManager {
            handlers: HashMap::new(),
            devices: HashMap::new(),
            aliases: HashMap::new(),
            tag_index: TagIndex::new(),
            namespace,
        }
    }

    pub fn add_handler(&mut self, handler: Arc<dyn DeviceHandler>) -> Result<()> {
        let name = handler.name().to_string();

        if self.handlers.contains_key(&name) {
            return Err(Error::DuplicateHandler(name));
        }
        self.handlers.insert(name, handler);
        Ok(())
    }

    pub fn handler_capabilities(&self, name: &str) -> Option<Capabilities> {
        self.handlers.get(name).map(|h| h.capabilities())
    }

    pub fn handler(&self, name: &str) -> Option<&Arc<dyn DeviceHandler>> {
        self.handlers.get(name)
    }

    pub fn handlers(&self) -> impl Iterator<Item = &Arc<dyn DeviceHandler>> {
        self.handlers.values()
    }

    fn add_device(&mut self, device: Device) -> Result<()> {
        if !self.handlers.contains_key(&device.handler_name) {
            return Err(Error::UnknownHandler(device.handler_name.clone()));
        }
        if self.devices.contains_key(&device.id) {
            return Err(Error::DuplicateID(device.id.clone()));
        }
        if let Some(alias) = &device.alias {
            if self.aliases.contains_key(alias) {
                return Err(Error::DuplicateAlias(alias.clone()));
            }
            self.aliases.insert(alias.clone(), device.id.clone());
        }

        self.tag_index.insert(&device.id, &device.tags);
        self.devices.insert(device.id.clone(), device);
        Ok(())
    }

    pub fn get_device(&self, id: &str) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn get_by_alias(&self, alias: &str) -> Option<&Device> {
        self.aliases.get(alias).and_then(|id| self.devices.get(id))
    }

    pub fn get_devices_by_tag(&self, query: &TagQuery) -> Vec<&Device> {
        let universe: HashSet<String> = self.devices.keys().cloned().collect();
        let ids = self.tag_index.resolve(query, &universe);

        self.devices
            .values()
            .filter(|d| ids.contains(&d.id))
            .collect()
    }

    pub fn get_devices_for_handler(&self, name: &str) -> Vec<&Device> {
        self.devices
            .values()
            .filter(|d| d.handler_name == name)
            .collect()
    }

    pub fn all_devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Synthesizes and registers every device named in `cfg`.
    /// Per-device failures are collected into the returned
    /// `MultiError` rather than aborting the whole load; the caller
    /// decides whether a partially loaded device set is acceptable.
    pub fn load_devices(&mut self, cfg: &DeviceConfig) -> MultiError {
        let mut errors = MultiError::new();

        for proto in &cfg.devices {
            for (idx, instance) in proto.instances.iter().enumerate() {
                let label = format!("{}[{}]", proto.r#type, idx);

                match build_device(&self.namespace, proto, instance) {
                    Ok(device) => {
                        if let Err(e) = self.add_device(device) {
                            errors.push(label, e);
                        }
                    }
                    Err(e) => errors.push(label, e),
                }
            }
        }

        errors
    }
}

fn build_device(namespace: &[String], proto: &DeviceProto, instance: &Instance) -> Result<Device> {
    let inherit = !instance.disable_inheritance;

    let data = match &instance.data {
        Some(d) => d.clone(),
        None if inherit => proto.data.clone(),
        None => toml::value::Table::new(),
    };

    let handler_name = instance
        .handler
        .clone()
        .or_else(|| inherit.then(|| proto.handler.clone()))
        .ok_or_else(|| Error::ConfigInvalid("device has no handler".into()))?;

    let id = derive_id(namespace, &data);

    let mut tags: HashSet<String> = match &instance.tags {
        Some(t) => t.iter().cloned().collect(),
        None if inherit => proto.tags.iter().cloned().collect(),
        None => HashSet::new(),
    };
    tags.insert(id.clone());
    tags.insert(proto.r#type.clone());

    let transforms_cfg: &[crate::config::device::TransformCfg] = match &instance.transforms {
        Some(t) => t.as_slice(),
        None if inherit => proto.transforms.as_slice(),
        None => &[],
    };
    let transforms: Vec<Transform> = transforms_cfg
        .iter()
        .cloned()
        .map(|t| t.into_transform())
        .collect::<Result<Vec<_>>>()?;

    let context = match &instance.context {
        Some(c) => c.clone(),
        None if inherit => proto.context.clone(),
        None => HashMap::new(),
    };

    let write_timeout = instance.write_timeout.unwrap_or(proto.write_timeout);

    let alias = match &instance.alias {
        Some(alias_cfg) => Some(alias_cfg.render(&id, &proto.r#type)?),
        None => None,
    };

    Ok(Device {
        id,
        r#type: proto.r#type.clone(),
        info: instance.info.clone(),
        tags,
        handler_name,
        data,
        output: instance.output.clone(),
        sort_index: instance.sort_index.unwrap_or(0),
        alias,
        transforms,
        context,
        write_timeout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::device::{DeviceProto, Instance};

    fn proto() -> DeviceProto {
        DeviceProto {
            r#type: "temperature".into(),
            tags: vec!["outdoor".into()],
            data: Default::default(),
            handler: "random_temp".into(),
            write_timeout: std::time::Duration::from_secs(30),
            context: Default::default(),
            transforms: vec![],
            instances: vec![],
        }
    }

    fn instance_with_id(id: &str) -> Instance {
        let mut data = toml::value::Table::new();
        data.insert("id".into(), toml::Value::String(id.into()));
        Instance {
            data: Some(data),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_device_inherits_prototype() {
        let proto = proto();
        let instance = instance_with_id("a");
        let device = build_device(&["ns".into()], &proto, &instance).unwrap();

        assert_eq!(device.handler_name, "random_temp");
        assert!(device.tags.contains("outdoor"));
        assert!(device.tags.contains(&device.id));
        assert!(device.tags.contains("temperature"));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut mgr = DeviceManager::new(vec!["ns".into()]);
        let proto = proto();
        let instance = instance_with_id("a");
        let device1 = build_device(&["ns".into()], &proto, &instance).unwrap();
        let device2 = build_device(&["ns".into()], &proto, &instance).unwrap();

        mgr.add_handler(Arc::new(crate::testutil::FixedValueHandler::new(
            "random_temp",
            devplug_api::device::Value::Int(42),
        )))
        .unwrap();

        assert!(mgr.add_device(device1).is_ok());
        assert!(matches!(
            mgr.add_device(device2),
            Err(Error::DuplicateID(_))
        ));
    }

    #[test]
    fn test_unknown_handler_rejected() {
        let mut mgr = DeviceManager::new(vec!["ns".into()]);
        let proto = proto();
        let instance = instance_with_id("a");
        let device = build_device(&["ns".into()], &proto, &instance).unwrap();

        assert!(matches!(
            mgr.add_device(device),
            Err(Error::UnknownHandler(_))
        ));
    }

    #[test]
    fn test_tag_index_resolve() {
        let mut index = TagIndex::new();
        let mut tags_a = HashSet::new();
        tags_a.insert("a".to_string());
        tags_a.insert("b".to_string());
        index.insert("dev-a", &tags_a);

        let mut tags_b = HashSet::new();
        tags_b.insert("b".to_string());
        index.insert("dev-b", &tags_b);

        let universe: HashSet<String> = ["dev-a".to_string(), "dev-b".to_string()]
            .into_iter()
            .collect();

        let query = TagQuery(vec![vec!["b".into()]]);
        let matched = index.resolve(&query, &universe);

        assert_eq!(matched.len(), 2);

        let query = TagQuery(vec![vec!["a".into(), "b".into()]]);
        let matched = index.resolve(&query, &universe);

        assert_eq!(matched, ["dev-a".to_string()].into_iter().collect());
    }
}
