//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p sub3_server -- [--config server.json] [--port 7000] [--tick-hz 10]
//!
//! Runs until Ctrl-C, then stops the loop and exits.

use std::{env, path::PathBuf};

use anyhow::Context;
use sub3_server::SubServer;
use sub3_shared::config::ServerConfig;
use tracing::{info, warn};

fn parse_args() -> anyhow::Result<ServerConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args.get(i + 1).context("--config needs a path")?;
            ServerConfig::from_file(&PathBuf::from(path))?
        }
        None => ServerConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" if i + 1 < args.len() => {
                cfg.port = args[i + 1].parse().context("parse --port")?;
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().context("parse --tick-hz")?;
                i += 2;
            }
            "--collision-radius" if i + 1 < args.len() => {
                cfg.collision_radius_m =
                    Some(args[i + 1].parse().context("parse --collision-radius")?);
                i += 2;
            }
            "--config" => i += 2,
            other => {
                warn!(arg = %other, "ignoring unknown argument");
                i += 1;
            }
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(
        host = %cfg.bind_host,
        port = cfg.port,
        tick_hz = cfg.tick_hz,
        collision_radius_m = ?cfg.collision_radius_m,
        "Starting server"
    );

    let mut server = SubServer::new(cfg);
    let addr = server.start().context("start server")?;
    info!(%addr, "Server listening");

    let interrupted = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("listen for ctrl-c")?;
            true
        }
        res = server.wait() => {
            res?;
            false
        }
    };
    if interrupted {
        info!("Shutting down");
        server.stop().await?;
    }
    Ok(())
}
