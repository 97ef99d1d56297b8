//! Configuration system.
//!
//! Server and client settings load from JSON; every field has a default so a
//! partial file is fine.

use std::{path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host the listener binds to.
    pub bind_host: String,
    /// Listen port; 0 picks an ephemeral port.
    pub port: u16,
    /// Frames per second of the server loop.
    pub tick_hz: u32,
    /// Upper bound on a single send before the client is dropped.
    pub send_timeout_ms: u64,
    /// Vessel collision radius in metres. `None` disables collisions.
    pub collision_radius_m: Option<f64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 7000,
            tick_hz: 10,
            send_timeout_ms: 1000,
            collision_radius_m: None,
        }
    }
}

impl ServerConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    /// Length of one frame. A zero rate is treated as 1 Hz.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.tick_hz.max(1)))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Loopback config on an ephemeral port, for tests.
    pub fn ephemeral(tick_hz: u32) -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            port: 0,
            tick_hz,
            ..Default::default()
        }
    }
}

/// Client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address, e.g. `127.0.0.1:7000`.
    pub server_addr: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:7000".to_string(),
        }
    }
}
