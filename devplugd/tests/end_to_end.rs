//! End-to-end scenarios exercising the whole runtime -- device
//! manager, scheduler, transaction store, rate limiter, health manager
//! -- wired together the way `Plugin::serve` wires them for a real
//! plugin, using small fixture handlers instead of real hardware.

use devplug_api::device::{TransformRegistry, Value};
use devplug_api::{DeviceHandler, TagQuery, WriteData, WritePayload};
use devplugd::config::device::{DeviceConfig, DeviceProto, Instance};
use devplugd::config::plugin::{PluginConfig, Settings, TransactionSettings};
use devplugd::core::Plugin;
use devplugd::manager::DeviceManager;
use devplugd::rpc::{Metadata, PluginService, VersionInfo};
use devplugd::testutil::{arc, AlwaysOkReader, BulkReader, DelayedNoopWriter, FailingWriter};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn metadata() -> Metadata {
    Metadata {
        name: "e2e".into(),
        maintainer: "".into(),
        description: "".into(),
        version: "0.0.0".into(),
        tags: vec![],
    }
}

fn version() -> VersionInfo {
    VersionInfo {
        plugin_version: "0.0.0".into(),
        sdk_version: "0.0.0".into(),
        build_info: "e2e".into(),
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

fn proto(type_name: &str, handler: &str, instances: Vec<Instance>) -> DeviceProto {
    DeviceProto {
        r#type: type_name.into(),
        tags: vec![],
        data: Default::default(),
        handler: handler.into(),
        write_timeout: Duration::from_secs(5),
        context: Default::default(),
        transforms: vec![],
        instances,
    }
}

fn device_config(protos: Vec<DeviceProto>) -> DeviceConfig {
    DeviceConfig {
        version: 1,
        devices: protos,
    }
}

async fn start(manager: DeviceManager, cfg: PluginConfig) -> devplugd::core::Running {
    let plugin = Plugin {
        manager,
        registry: TransformRegistry::new(),
        health_checks: vec![],
        metadata: metadata(),
        version: version(),
    };

    plugin.serve(cfg).await.unwrap()
}

fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.read.interval = Duration::from_millis(30);
    settings.write.interval = Duration::from_millis(30);
    settings
}

// E1: one prototype, one instance, a handler that always reads 42.
#[tokio::test]
async fn e1_single_read() {
    let mut manager = DeviceManager::new(vec!["e2e".into()]);

    manager
        .add_handler(arc(devplugd::testutil::FixedValueHandler::new(
            "random_temp",
            Value::Int(42),
        )))
        .unwrap();

    let cfg = device_config(vec![proto(
        "temperature",
        "random_temp",
        vec![instance_with_id("a")],
    )]);

    assert!(manager.load_devices(&cfg).into_result().is_ok());

    let mut plugin_cfg = PluginConfig::default();
    plugin_cfg.settings = fast_settings();

    let running = start(manager, plugin_cfg).await;

    tokio::time::sleep(Duration::from_millis(100)).await;

    let readings = running.rpc.read(TagQuery::all()).await.unwrap();

    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].value, Value::Int(42));
    assert_eq!(readings[0].r#type, "temperature");

    running.shutdown().await;
}

// E2: a write handler that succeeds after 100ms.
#[tokio::test]
async fn e2_write_transaction_lifecycle() {
    let mut manager = DeviceManager::new(vec!["e2e".into()]);

    manager
        .add_handler(arc(DelayedNoopWriter::new(
            "noop_write",
            Duration::from_millis(100),
        )))
        .unwrap();

    let cfg = device_config(vec![proto(
        "actuator",
        "noop_write",
        vec![instance_with_id("a")],
    )]);

    assert!(manager.load_devices(&cfg).into_result().is_ok());

    let mut plugin_cfg = PluginConfig::default();
    plugin_cfg.settings = fast_settings();

    let running = start(manager, plugin_cfg).await;
    let device = running.rpc.devices(TagQuery::all()).await[0].clone();

    let ids = running
        .rpc
        .write(
            &device.id,
            vec![WriteData {
                action: "set".into(),
                data: WritePayload::Strings(vec!["1".into()]),
                transaction_id: String::new(),
            }],
        )
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);

    let tx = running.rpc.transaction(&ids[0]).await.unwrap();
    assert!(matches!(
        tx.status,
        devplug_api::TransactionStatus::Pending | devplug_api::TransactionStatus::Writing
    ));

    tokio::time::sleep(Duration::from_millis(200)).await;

    let tx = running.rpc.transaction(&ids[0]).await.unwrap();
    assert_eq!(tx.status, devplug_api::TransactionStatus::Done);

    running.shutdown().await;
}

// E3: a write handler that always fails with "bad".
#[tokio::test]
async fn e3_write_failure() {
    let mut manager = DeviceManager::new(vec!["e2e".into()]);

    manager
        .add_handler(arc(FailingWriter::new("failer", "bad")))
        .unwrap();

    let cfg = device_config(vec![proto("actuator", "failer", vec![instance_with_id("a")])]);

    assert!(manager.load_devices(&cfg).into_result().is_ok());

    let mut plugin_cfg = PluginConfig::default();
    plugin_cfg.settings = fast_settings();

    let running = start(manager, plugin_cfg).await;
    let device = running.rpc.devices(TagQuery::all()).await[0].clone();

    let ids = running
        .rpc
        .write(
            &device.id,
            vec![WriteData {
                action: "set".into(),
                data: WritePayload::Strings(vec!["1".into()]),
                transaction_id: String::new(),
            }],
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;

    let tx = running.rpc.transaction(&ids[0]).await.unwrap();

    assert_eq!(tx.status, devplug_api::TransactionStatus::Error);
    assert_eq!(tx.message.as_deref(), Some("bad"));

    running.shutdown().await;
}

// E4: a 1s transaction TTL expires a completed write.
#[tokio::test]
async fn e4_transaction_ttl() {
    let mut manager = DeviceManager::new(vec!["e2e".into()]);

    manager
        .add_handler(arc(DelayedNoopWriter::new(
            "noop_write",
            Duration::from_millis(10),
        )))
        .unwrap();

    let cfg = device_config(vec![proto(
        "actuator",
        "noop_write",
        vec![instance_with_id("a")],
    )]);

    assert!(manager.load_devices(&cfg).into_result().is_ok());

    let mut plugin_cfg = PluginConfig::default();
    plugin_cfg.settings = fast_settings();
    plugin_cfg.settings.transaction = TransactionSettings {
        ttl: Duration::from_secs(1),
    };

    let running = start(manager, plugin_cfg).await;
    let device = running.rpc.devices(TagQuery::all()).await[0].clone();

    let ids = running
        .rpc
        .write(
            &device.id,
            vec![WriteData {
                action: "set".into(),
                data: WritePayload::Strings(vec!["1".into()]),
                transaction_id: String::new(),
            }],
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(running.rpc.transaction(&ids[0]).await.is_ok());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(matches!(
        running.rpc.transaction(&ids[0]).await,
        Err(devplug_api::Error::NotFound)
    ));

    running.shutdown().await;
}

// E5: three devices tagged {a,b}, {b}, {c}.
#[tokio::test]
async fn e5_tag_filter() {
    let mut manager = DeviceManager::new(vec!["e2e".into()]);
    let handler = arc(devplugd::testutil::FixedValueHandler::new("h", Value::Int(0)));

    manager.add_handler(handler).unwrap();

    fn proto_with_tags(type_name: &str, tags: Vec<&str>, id: &str) -> DeviceProto {
        DeviceProto {
            r#type: type_name.into(),
            tags: tags.into_iter().map(String::from).collect(),
            data: Default::default(),
            handler: "h".into(),
            write_timeout: Duration::from_secs(5),
            context: Default::default(),
            transforms: vec![],
            instances: vec![instance_with_id(id)],
        }
    }

    let cfg = device_config(vec![
        proto_with_tags("d1", vec!["a", "b"], "1"),
        proto_with_tags("d2", vec!["b"], "2"),
        proto_with_tags("d3", vec!["c"], "3"),
    ]);

    assert!(manager.load_devices(&cfg).into_result().is_ok());

    let plugin_cfg = PluginConfig::default();
    let running = start(manager, plugin_cfg).await;

    let matched = running
        .rpc
        .devices(TagQuery(vec![vec!["b".into()]]))
        .await;
    assert_eq!(matched.len(), 2);

    let matched = running
        .rpc
        .devices(TagQuery(vec![vec!["a".into()], vec!["c".into()]]))
        .await;
    let types: HashSet<String> = matched.into_iter().map(|d| d.r#type).collect();
    assert_eq!(types, ["d1".to_string(), "d3".to_string()].into_iter().collect());

    let matched = running.rpc.devices(TagQuery::all()).await;
    assert_eq!(matched.len(), 3);

    running.shutdown().await;
}

// E6: a bulk-read handler servicing two devices in one call.
#[tokio::test]
async fn e6_bulk_read_aggregation() {
    let mut manager = DeviceManager::new(vec!["e2e".into()]);

    manager.add_handler(arc(BulkReader::new("bulk"))).unwrap();

    let cfg = device_config(vec![proto(
        "sensor",
        "bulk",
        vec![instance_with_id("a"), instance_with_id("b")],
    )]);

    assert!(manager.load_devices(&cfg).into_result().is_ok());

    let mut plugin_cfg = PluginConfig::default();
    plugin_cfg.settings = fast_settings();

    let running = start(manager, plugin_cfg).await;

    tokio::time::sleep(Duration::from_millis(100)).await;

    let readings = running.rpc.read(TagQuery::all()).await.unwrap();
    assert_eq!(readings.len(), 2);

    let device_ids: HashSet<String> = readings.into_iter().map(|r| r.device_id).collect();
    let devices: HashSet<String> = running
        .rpc
        .devices(TagQuery::all())
        .await
        .into_iter()
        .map(|d| d.id)
        .collect();
    assert_eq!(device_ids, devices);

    running.shutdown().await;
}

// E7: rate=2, burst=2 bounds handler invocations over a 1s window.
#[tokio::test]
async fn e7_rate_limit() {
    let mut manager = DeviceManager::new(vec!["e2e".into()]);
    let reader = Arc::new(AlwaysOkReader::new("limited"));

    manager
        .add_handler(reader.clone() as Arc<dyn DeviceHandler>)
        .unwrap();

    let cfg = device_config(vec![proto("sensor", "limited", vec![instance_with_id("a")])]);

    assert!(manager.load_devices(&cfg).into_result().is_ok());

    let mut plugin_cfg = PluginConfig::default();
    plugin_cfg.settings = fast_settings();
    plugin_cfg.settings.read.interval = Duration::from_millis(10);
    plugin_cfg.settings.limiter.rate = 2;
    plugin_cfg.settings.limiter.burst = 2;

    let running = start(manager, plugin_cfg).await;

    tokio::time::sleep(Duration::from_secs(1)).await;

    let n = reader.invocations();
    assert!((1..=4).contains(&n), "invocations out of bounds: {n}");

    running.shutdown().await;
}

// E8: a failing health check with a health-signal file that recovers.
#[tokio::test]
async fn e8_health_file() {
    use chrono::Utc;
    use devplug_api::{CheckStatus, CheckType, HealthCheck};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlippableCheck {
        ok: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl HealthCheck for FlippableCheck {
        fn name(&self) -> &str {
            "flippable"
        }
        fn check_type(&self) -> CheckType {
            CheckType::Periodic
        }
        fn interval(&self) -> Duration {
            Duration::from_millis(20)
        }
        async fn update(&self) {}
        fn status(&self) -> CheckStatus {
            CheckStatus {
                ts: Utc::now(),
                ok: self.ok.load(Ordering::SeqCst),
                message: None,
            }
        }
    }

    let manager = DeviceManager::new(vec!["e2e".into()]);
    let ok_flag = Arc::new(AtomicBool::new(false));
    let health_file = std::env::temp_dir().join(format!("devplugd-e8-{}", uuid::Uuid::new_v4()));

    let mut plugin_cfg = PluginConfig::default();
    plugin_cfg.health.health_file = Some(health_file.clone());
    plugin_cfg.health.update_interval = Duration::from_millis(100);
    plugin_cfg.health.checks.disable_defaults = true;

    let plugin = Plugin {
        manager,
        registry: TransformRegistry::new(),
        health_checks: vec![Arc::new(FlippableCheck {
            ok: ok_flag.clone(),
        })],
        metadata: metadata(),
        version: version(),
    };
    let running = plugin.serve(plugin_cfg).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(tokio::fs::metadata(&health_file).await.is_err());

    ok_flag.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(tokio::fs::metadata(&health_file).await.is_ok());

    running.shutdown().await;
    let _ = tokio::fs::remove_file(&health_file).await;
}
