#![deny(unsafe_code)]

use clap::Parser;
use devplugd::cli::{Cli, ExitCode};
use devplugd::config;
use devplugd::core::Plugin;
use devplugd::manager::DeviceManager;
use devplugd::rpc::{Metadata, VersionInfo};
use devplug_api::device::TransformRegistry;
use tracing::{error, info, warn};

/// Loads and merges configuration, applies environment-variable
/// overrides, and installs the tracing subscriber (mirroring the
/// teacher's own `init_app`: config first, then a logger sized to
/// what the config -- or `--debug` -- asked for).
async fn init_app(cli: &Cli) -> Result<(config::PluginConfig, config::DeviceConfig), ExitCode> {
    let plugin_cfg = config::load_plugin_config().await.map_err(|e| {
        eprintln!("ERROR: {e}");
        ExitCode::ConfigError
    })?;
    let plugin_cfg = config::apply_env_overrides(plugin_cfg, &cli.env_prefix).map_err(|e| {
        eprintln!("ERROR: {e}");
        ExitCode::ConfigError
    })?;
    let device_cfg = config::load_device_config().await.map_err(|e| {
        eprintln!("ERROR: {e}");
        ExitCode::ConfigError
    })?;

    let level = if cli.debug || plugin_cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("unable to set global default subscriber");

    Ok((plugin_cfg, device_cfg))
}

/// This binary registers no device handlers of its own -- it's the
/// generic runtime a concrete plugin links against and configures with
/// real handlers before calling `Plugin::serve`. Running it directly
/// only proves configuration loads and setup actions run cleanly,
/// which is exactly what `--dry-run` is for.
fn namespace(cfg: &config::PluginConfig) -> Vec<String> {
    let mut ns = Vec::new();

    if cfg.id.use_machine_id {
        ns.push("machine".to_string());
    }
    if cfg.id.use_plugin_tag {
        ns.push("devplugd".to_string());
    }
    ns.extend(cfg.id.use_env.iter().filter_map(|v| std::env::var(v).ok()));
    ns.extend(cfg.id.use_custom.iter().cloned());
    ns
}

async fn run(cli: Cli) -> Result<(), ExitCode> {
    let (plugin_cfg, device_cfg) = init_app(&cli).await?;
    let mut manager = DeviceManager::new(namespace(&plugin_cfg));

    if let Err(errors) = manager.load_devices(&device_cfg).into_result() {
        warn!(%errors, "some devices failed to load");
    }

    info!(count = manager.len(), "devices loaded");

    if manager.is_empty() && plugin_cfg.require_devices {
        error!("no devices loaded and requireDevices is set, aborting");
        return Err(ExitCode::RuntimeError);
    }

    if cli.dry_run {
        info!("dry run complete");
        return Ok(());
    }

    let plugin = Plugin {
        manager,
        registry: TransformRegistry::new(),
        health_checks: Vec::new(),
        metadata: Metadata {
            name: "devplugd".into(),
            maintainer: "".into(),
            description: "Device-plugin framework runtime".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            tags: Vec::new(),
        },
        version: VersionInfo {
            plugin_version: env!("CARGO_PKG_VERSION").into(),
            sdk_version: env!("CARGO_PKG_VERSION").into(),
            build_info: "devplugd".into(),
        },
    };

    let running = plugin.serve(plugin_cfg).await.map_err(|e| {
        error!(error = %e, "failed to start serving");
        ExitCode::RuntimeError
    })?;

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }

    running.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(()) => ExitCode::Success,
        Err(code) => code,
    };

    std::process::exit(code.into());
}
