//! pixelstaged
//!
//! Thin demonstration/ops entry point: loads configuration, wires up
//! logging, registers the built-in scenes, spawns one scheduler per
//! configured device, and idles on ctrl-c. Nothing here is part of the
//! hard core — a real deployment drives [`pixelstage::gateway::CommandGateway`]
//! from its own bus subscriber instead of this binary's idle loop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use pixelstage::config::{Config, DriverKind};
use pixelstage::device::Geometry;
use pixelstage::metrics::NullMetricsSink;
use pixelstage::scene::SceneRegistry;
use pixelstage::scenes::register_builtins;
use pixelstage::scheduler::{self, DeviceHandle};
use pixelstage::transport::{MockTransport, RealTransport, Transport};
use pixelstage::{CommandGateway, Settings};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(name = "pixelstaged")]
#[clap(about = "LED-matrix rendering scheduler", version)]
struct Cli {
    /// Path to a TOML configuration file; falls back to `pixelstage.toml`
    /// in the working directory if omitted and present.
    #[clap(long)]
    config: Option<PathBuf>,
}

fn build_transports(settings: &Settings) -> HashMap<DriverKind, Arc<dyn Transport>> {
    let mut transports: HashMap<DriverKind, Arc<dyn Transport>> = HashMap::new();
    transports.insert(
        DriverKind::Mock,
        Arc::new(MockTransport::new(
            64,
            64,
            Duration::from_millis(settings.mock_push_duration_ms),
        )),
    );
    transports
}

fn real_transport_for(timeout: Duration, address: &str) -> Arc<dyn Transport> {
    Arc::new(RealTransport::new(format!("http://{address}/pic"), timeout))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("loading configuration")?;
    let settings = config.settings().context("parsing settings")?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(settings.log_level.as_str()))
        .init();

    info!(devices = settings.devices.len(), "starting pixelstaged");

    let mut registry = SceneRegistry::new();
    register_builtins(&mut registry).context("registering built-in scenes")?;
    let registry = Arc::new(registry);

    let push_timeout = Duration::from_millis(settings.push_timeout_ms);
    let mut devices: HashMap<String, DeviceHandle> = HashMap::new();

    for device in &settings.devices {
        let mut transports = build_transports(&settings);
        if let Some(address) = &device.address {
            transports.insert(DriverKind::Real, real_transport_for(push_timeout, address));
        }

        let handle = scheduler::spawn(
            device.host.clone(),
            Geometry {
                width: device.width,
                height: device.height,
            },
            Arc::clone(&registry),
            transports,
            device.driver,
            Arc::new(NullMetricsSink),
        );

        info!(host = %device.host, width = device.width, height = device.height, "device scheduler started");
        handle.switch_scene("startup-info", pixelstage::scene::empty_payload());
        devices.insert(device.host.clone(), handle);
    }

    let _gateway = CommandGateway::new(devices, registry);

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    info!("shutting down");
    Ok(())
}
