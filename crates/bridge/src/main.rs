use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use barn_bridge::config::{self, Config};
use barn_bridge::mqtt;
use barn_bridge::scheduler::Scheduler;
use barn_bridge::Bridge;

/// Bridge a barn gateway's line protocol to an MQTT bus.
#[derive(Parser, Debug)]
#[command(name = "barn-bridge", version, about, long_about = None)]
struct Args {
    /// Gateway IP address
    #[arg(long)]
    ip: String,

    /// Gateway TCP port
    #[arg(long)]
    port: u16,

    /// Relay to and from the MQTT broker
    #[arg(long, default_value_t = false)]
    mqtt: bool,

    /// TOML config file (schedule, gateway and mqtt sections)
    #[arg(long, env = "BRIDGE_CONFIG")]
    config: Option<String>,

    /// Broker host, overrides the config file
    #[arg(long, env = "MQTT_HOST")]
    mqtt_host: Option<String>,

    /// Broker port, overrides the config file
    #[arg(long, env = "MQTT_PORT")]
    mqtt_port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Non-zero exit lets the supervisor restart us with a fresh connection.
    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    // ── Config ──────────────────────────────────────────────────────
    let mut cfg = match &args.config {
        Some(path) => config::load(path)?,
        None => Config::default(),
    };
    if let Some(host) = args.mqtt_host {
        cfg.mqtt.host = host;
    }
    if let Some(port) = args.mqtt_port {
        cfg.mqtt.port = port;
    }
    cfg.validate()?;

    info!(
        interval_sec = cfg.schedule.irrigation_interval_sec,
        duration_sec = cfg.schedule.irrigation_duration_sec,
        light_threshold = cfg.schedule.light_threshold,
        light_on_min = cfg.schedule.light_on_min,
        "schedule loaded"
    );

    // ── Gateway transport ───────────────────────────────────────────
    let stream = TcpStream::connect((args.ip.as_str(), args.port))
        .await
        .with_context(|| format!("failed to connect to gateway {}:{}", args.ip, args.port))?;
    stream
        .set_nodelay(true)
        .context("failed to set TCP_NODELAY on gateway socket")?;
    info!(ip = %args.ip, port = args.port, "connected to gateway");

    // ── MQTT (optional) ─────────────────────────────────────────────
    let session = args.mqtt.then(|| mqtt::connect(&cfg.mqtt));
    if session.is_none() {
        info!("mqtt disabled, running standalone");
    }

    // ── Bridge loop ─────────────────────────────────────────────────
    let scheduler = Scheduler::new(&cfg.schedule, Instant::now());
    let mut bridge = Bridge::new(
        stream,
        scheduler,
        session,
        Duration::from_millis(cfg.gateway.read_timeout_ms),
        cfg.gateway.max_frame_len,
    );

    bridge
        .run(shutdown_signal())
        .await
        .context("bridge stopped")?;

    info!("bridge exited cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // Without a signal handler, run until the transport ends.
        error!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}
