//! Helpers shared by the socket-level integration tests.

use std::{net::SocketAddr, time::Duration};

use sub3_client::SubClient;
use sub3_server::{ServerStatus, SubServer};
use sub3_shared::{config::ServerConfig, message::Message};
use tokio::time::Instant;

/// Generous upper bound for anything that should happen within a few frames.
pub const WAIT: Duration = Duration::from_secs(3);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Starts a loopback server on an ephemeral port.
pub fn start_server(cfg: ServerConfig) -> anyhow::Result<(SubServer, SocketAddr)> {
    let mut server = SubServer::new(cfg);
    let addr = server.start()?;
    Ok((server, addr))
}

/// Connects a client and waits until it has been given its vessel.
pub async fn join(addr: SocketAddr) -> anyhow::Result<SubClient> {
    let mut client = SubClient::connect_addr(addr).await?;
    client
        .poll_until(WAIT, |m| matches!(m, Message::SetCurrentVessel { .. }))
        .await?;
    Ok(client)
}

/// Waits until the server publishes a status satisfying `pred`.
pub async fn wait_for_status<F>(server: &SubServer, mut pred: F) -> anyhow::Result<ServerStatus>
where
    F: FnMut(&ServerStatus) -> bool,
{
    let mut rx = server
        .subscribe()
        .ok_or_else(|| anyhow::anyhow!("server not started"))?;
    let deadline = Instant::now() + WAIT;
    loop {
        let status = rx.borrow_and_update().clone();
        if pred(&status) {
            return Ok(status);
        }
        tokio::time::timeout_at(deadline, rx.changed())
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for status, last {status:?}"))??;
    }
}
