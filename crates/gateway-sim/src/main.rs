//! Stand-in for the barn gateway hardware: serves the line protocol on TCP so
//! the bridge can be run without a sensor network.

mod gateway;
mod sim;

use anyhow::{bail, Context, Result};
use std::{env, time::Duration};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use barn_bridge::codec;
use gateway::SimGateway;
use sim::{LightLevelSim, Scenario};

/// Console chatter the real gateway prints between frames.
const NOISE_LINE: &str = "Running....";

struct Settings {
    bind: String,
    barns: Vec<u32>,
    sample_every: Duration,
    keepalive_every: Duration,
    noise_prob: f32,
    scenario: Scenario,
    diurnal_period_s: f64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// "1, 2,3" -> [1, 2, 3]
fn parse_barns(s: &str) -> Result<Vec<u32>> {
    let barns = s
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.parse::<u32>()
                .with_context(|| format!("invalid barn id '{p}'"))
        })
        .collect::<Result<Vec<_>>>()?;
    if barns.is_empty() {
        bail!("no barns configured");
    }
    Ok(barns)
}

impl Settings {
    fn from_env() -> Result<Self> {
        let barns = env::var("SIM_BARNS").unwrap_or_else(|_| "1,2,3".to_string());
        Ok(Self {
            bind: env::var("SIM_BIND").unwrap_or_else(|_| "0.0.0.0:8888".to_string()),
            barns: parse_barns(&barns).context("SIM_BARNS")?,
            sample_every: Duration::from_secs(env_or("SAMPLE_EVERY_S", 8_u64).max(1)),
            keepalive_every: Duration::from_secs(env_or("KEEPALIVE_EVERY_S", 30_u64).max(1)),
            noise_prob: env_or("NOISE_LINE_PROB", 0.05_f32),
            scenario: Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default()),
            diurnal_period_s: env_or("DIURNAL_PERIOD_S", 600.0_f64).max(1.0),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env()?;
    let sim = LightLevelSim::new(settings.scenario, settings.barns.len(), settings.diurnal_period_s);
    let mut gateway = SimGateway::new(settings.barns.clone(), sim);

    let listener = TcpListener::bind(&settings.bind)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind))?;
    info!(
        bind = %settings.bind,
        barns = ?settings.barns,
        scenario = %settings.scenario,
        "gateway sim listening"
    );

    // One bridge at a time, like the hardware.
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("accept failed: {e}");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };
        info!(%peer, "bridge connected");
        if let Err(e) = serve(stream, &mut gateway, &settings).await {
            warn!(%peer, "session ended: {e:#}");
        }
    }
}

async fn serve(stream: TcpStream, gateway: &mut SimGateway, settings: &Settings) -> Result<()> {
    let (read_half, mut writer) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let mut sample = interval(settings.sample_every);
    let mut keepalive = interval(settings.keepalive_every);
    sample.set_missed_tick_behavior(MissedTickBehavior::Skip);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = sample.tick() => {
                for msg in gateway.readings(Instant::now()) {
                    write_line(&mut writer, &msg.to_string()).await?;
                }
                if fastrand::f32() < settings.noise_prob {
                    write_line(&mut writer, NOISE_LINE).await?;
                }
            }
            _ = keepalive.tick() => {
                for msg in gateway.keep_alives() {
                    write_line(&mut writer, &msg.to_string()).await?;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line.context("read from bridge failed")? else {
                    info!("bridge disconnected");
                    return Ok(());
                };
                match codec::parse(line.as_bytes()) {
                    Ok(cmd) => {
                        info!(frame = %line, "command from bridge");
                        for reply in gateway.handle_command(&cmd, Instant::now()) {
                            write_line(&mut writer, &reply.to_string()).await?;
                        }
                    }
                    Err(e) => warn!("{e}"),
                }
            }
        }
    }
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> Result<()> {
    writer
        .write_all(format!("{line}\n").as_bytes())
        .await
        .context("write to bridge failed")
}

// ===========================================================================
// Tests
// ===========================================================================
