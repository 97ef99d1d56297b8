//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p sub3_client -- [--addr 127.0.0.1:7000] [--heading 1.57 --speed 5]
//!
//! Connects, logs what the server replicates and, when motion values are
//! given, steers the assigned vessel once it arrives.

use std::{env, time::Duration};

use sub3_client::SubClient;
use sub3_shared::config::ClientConfig;
use tracing::info;

struct Args {
    cfg: ClientConfig,
    motion: Option<(f64, f64, f64)>,
}

fn parse_args() -> Args {
    let mut cfg = ClientConfig::default();
    let (mut heading, mut speed, mut depth_rate) = (None, None, None);
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--heading" if i + 1 < args.len() => {
                heading = args[i + 1].parse().ok();
                i += 2;
            }
            "--speed" if i + 1 < args.len() => {
                speed = args[i + 1].parse().ok();
                i += 2;
            }
            "--depth-rate" if i + 1 < args.len() => {
                depth_rate = args[i + 1].parse().ok();
                i += 2;
            }
            _ => i += 1,
        }
    }
    let motion = match (heading, speed) {
        (None, None) if depth_rate.is_none() => None,
        _ => Some((
            heading.unwrap_or(0.0),
            speed.unwrap_or(0.0),
            depth_rate.unwrap_or(0.0),
        )),
    };
    Args { cfg, motion }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args();
    let mut client = SubClient::connect(&args.cfg).await?;
    let mut pending_motion = args.motion;

    loop {
        if client.poll(Duration::from_secs(5)).await?.is_none() {
            info!("No traffic from server for 5s");
            continue;
        }
        if let (Some((heading, speed, depth_rate)), Some(_)) =
            (pending_motion, client.current_vessel)
        {
            client.steer(heading, speed, depth_rate).await?;
            info!(heading, speed, depth_rate, "Steering");
            pending_motion = None;
        }
    }
}
