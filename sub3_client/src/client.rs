//! Client implementation.
//!
//! The client keeps a mirror of the server's ocean: every message it receives
//! is executed against a local `Ocean`, so after the join sequence the mirror
//! matches the server. It also records the player id and controllable vessel
//! the server assigned.

use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use sub3_shared::{
    config::ClientConfig,
    ids::{PlayerId, VesselId},
    message::Message,
    net::FramedConn,
    ocean::Ocean,
};
use tokio::time::Instant;
use tracing::{debug, info};

/// Replicating client.
pub struct SubClient {
    conn: FramedConn,
    pub ocean: Ocean,
    pub player_id: Option<PlayerId>,
    pub current_vessel: Option<VesselId>,
    /// Every message received so far, in arrival order.
    pub received: Vec<Message>,
}

impl SubClient {
    pub async fn connect(cfg: &ClientConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        Self::connect_addr(addr).await
    }

    pub async fn connect_addr(addr: SocketAddr) -> anyhow::Result<Self> {
        info!(server = %addr, "Connecting to server");
        let conn = FramedConn::connect(addr).await?;
        Ok(Self {
            conn,
            ocean: Ocean::new(),
            player_id: None,
            current_vessel: None,
            received: Vec::new(),
        })
    }

    /// Receives and applies one message, waiting at most `timeout`.
    pub async fn poll(&mut self, timeout: Duration) -> anyhow::Result<Option<Message>> {
        let Some(msg) = self.conn.recv_timeout(timeout).await? else {
            return Ok(None);
        };
        self.apply(&msg)?;
        self.received.push(msg.clone());
        Ok(Some(msg))
    }

    /// Polls until a message matching `pred` arrives or `timeout` runs out.
    pub async fn poll_until<F>(
        &mut self,
        timeout: Duration,
        mut pred: F,
    ) -> anyhow::Result<Message>
    where
        F: FnMut(&Message) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                anyhow::bail!("timed out waiting for message");
            }
            if let Some(msg) = self.poll(left).await? {
                if pred(&msg) {
                    return Ok(msg);
                }
            }
        }
    }

    fn apply(&mut self, msg: &Message) -> anyhow::Result<()> {
        match msg {
            Message::SetPlayerId { player } => {
                info!(%player, "Assigned player id");
                // A new identity means a fresh session; the server resends
                // the world right after.
                self.ocean.reset_all();
                self.player_id = Some(*player);
                self.current_vessel = None;
            }
            Message::SetCurrentVessel { id } => {
                info!(vessel = %id, "Assigned vessel");
                self.current_vessel = Some(*id);
            }
            other => {
                debug!(message = other.name(), "Applying");
                other
                    .execute(&mut self.ocean)
                    .with_context(|| format!("apply {}", other.name()))?;
                if let Message::Despawn { id } = other {
                    if self.current_vessel == Some(*id) {
                        info!(vessel = %id, "Controlled vessel lost");
                        self.current_vessel = None;
                    }
                }
            }
        }
        Ok(())
    }

    /// Sends new motion values for the controlled vessel. Position is taken
    /// from the mirror; the server advances it from there.
    pub async fn steer(
        &mut self,
        heading: f64,
        speed: f64,
        depth_rate: f64,
    ) -> anyhow::Result<()> {
        let id = self.current_vessel.context("no controllable vessel")?;
        let state = self
            .ocean
            .state(id)?
            .with_motion(heading, speed, depth_rate);
        self.send(&Message::UpdateState { id, state }).await
    }

    /// Sends a raw message to the server.
    pub async fn send(&mut self, msg: &Message) -> anyhow::Result<()> {
        self.conn.send(msg).await
    }

    pub fn server_peer(&self) -> SocketAddr {
        self.conn.peer_addr()
    }
}
