//! Server lifecycle and main loop.
//!
//! `SubServer` binds a non-blocking listener and runs the frame loop on its own
//! tokio task. The owner and the loop share two things only: a stop flag and
//! a status channel. The loop checks the flag at the top of every frame, so a
//! `stop()` takes effect within one tick interval.
//!
//! Frame order: accept, inbound, world tick, broadcast, physics, pace.

use std::{
    io::ErrorKind,
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use sub3_shared::{
    config::ServerConfig,
    net::TcpChannel,
    physics::{NullPhysics, PhysicsBackend, ProximityPhysics},
};
use tokio::{
    net::TcpStream,
    sync::watch,
    task::JoinHandle,
    time::{self, Instant},
};
use tracing::{error, info, warn};

use crate::{
    error::ServerError,
    session::{ServerStatus, Session},
};

/// Lifecycle state of a `SubServer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Running,
    Stopping,
}

/// Handle owning the server loop.
pub struct SubServer {
    cfg: ServerConfig,
    state: ServerState,
    keep_running: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
    status_rx: Option<watch::Receiver<ServerStatus>>,
    task: Option<JoinHandle<Result<(), ServerError>>>,
}

impl SubServer {
    pub fn new(cfg: ServerConfig) -> Self {
        Self {
            cfg,
            state: ServerState::Stopped,
            keep_running: Arc::new(AtomicBool::new(false)),
            local_addr: None,
            status_rx: None,
            task: None,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.cfg
    }

    /// Binds the listener and spawns the loop. Must be called inside a tokio
    /// runtime. Returns the bound address.
    pub fn start(&mut self) -> anyhow::Result<SocketAddr> {
        if self.state != ServerState::Stopped {
            anyhow::bail!("server already started");
        }

        let bind = format!("{}:{}", self.cfg.bind_host, self.cfg.port);
        let listener = StdTcpListener::bind(&bind).with_context(|| format!("tcp bind {bind}"))?;
        // Accepting must never hold up a frame.
        listener
            .set_nonblocking(true)
            .context("set listener non-blocking")?;
        let addr = listener.local_addr().context("listener local_addr")?;

        let (status_tx, status_rx) = watch::channel(ServerStatus::default());
        self.keep_running.store(true, Ordering::SeqCst);
        let task = tokio::spawn(run_loop(
            listener,
            self.cfg.clone(),
            self.keep_running.clone(),
            status_tx,
        ));

        self.task = Some(task);
        self.status_rx = Some(status_rx);
        self.local_addr = Some(addr);
        self.state = ServerState::Running;
        info!(%addr, tick_hz = self.cfg.tick_hz, "server started");
        Ok(addr)
    }

    /// Asks the loop to stop and waits until it has. The listener and every
    /// client connection are closed when the loop exits; clients get no
    /// goodbye message.
    ///
    /// Returns the loop's error if it had already died on its own.
    pub async fn stop(&mut self) -> anyhow::Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        self.state = ServerState::Stopping;
        self.keep_running.store(false, Ordering::SeqCst);

        let result = task.await;
        self.state = ServerState::Stopped;
        self.local_addr = None;
        info!("server stopped");
        result.context("server loop panicked")??;
        Ok(())
    }

    /// Waits for the loop to exit on its own, which only happens when it hits
    /// a fatal error. Cancel-safe: dropping the future leaves the loop owned
    /// by this handle.
    pub async fn wait(&mut self) -> anyhow::Result<()> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let result = task.await;
        self.task = None;
        self.keep_running.store(false, Ordering::SeqCst);
        self.state = ServerState::Stopped;
        self.local_addr = None;
        result.context("server loop panicked")??;
        Ok(())
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Whether the loop is live. False once it has exited, even before
    /// `stop()` or `wait()` collects it.
    pub fn is_running(&self) -> bool {
        self.state == ServerState::Running
            && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Port actually bound, useful after binding port 0.
    pub fn bound_port(&self) -> Option<u16> {
        self.local_addr.map(|a| a.port())
    }

    /// Status as of the last completed frame.
    pub fn status(&self) -> Option<ServerStatus> {
        self.status_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    /// Receiver that changes after every frame.
    pub fn subscribe(&self) -> Option<watch::Receiver<ServerStatus>> {
        self.status_rx.clone()
    }
}

impl Drop for SubServer {
    fn drop(&mut self) {
        // The loop exits at its next frame.
        self.keep_running.store(false, Ordering::SeqCst);
    }
}

fn physics_for(cfg: &ServerConfig) -> Box<dyn PhysicsBackend> {
    match cfg.collision_radius_m {
        Some(radius) if radius > 0.0 => Box::new(ProximityPhysics::new(radius)),
        _ => Box::new(NullPhysics),
    }
}

async fn run_loop(
    listener: StdTcpListener,
    cfg: ServerConfig,
    keep_running: Arc<AtomicBool>,
    status_tx: watch::Sender<ServerStatus>,
) -> Result<(), ServerError> {
    let interval = cfg.tick_interval();
    let mut session = Session::new(physics_for(&cfg));
    let mut last_update = Instant::now();
    let mut next_frame = Instant::now() + interval;

    while keep_running.load(Ordering::SeqCst) {
        if let Err(e) = run_frame(&listener, &mut session, &cfg, &mut last_update).await {
            error!(error = %e, "server loop aborted");
            return Err(e);
        }
        status_tx.send_replace(session.status());

        time::sleep_until(next_frame).await;
        next_frame = Instant::now() + interval;
    }

    info!(players = session.players().len(), "server loop exiting");
    Ok(())
}

async fn run_frame(
    listener: &StdTcpListener,
    session: &mut Session,
    cfg: &ServerConfig,
    last_update: &mut Instant,
) -> Result<(), ServerError> {
    accept_pending(listener, session, cfg.send_timeout()).await?;

    let now = Instant::now();
    let dt = now.duration_since(*last_update).as_secs_f64();
    *last_update = now;
    session.run_frame(dt).await
}

/// Admits every connection already waiting on the listener.
async fn accept_pending(
    listener: &StdTcpListener,
    session: &mut Session,
    send_timeout: Duration,
) -> Result<(), ServerError> {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => match open_channel(stream, send_timeout) {
                Ok(channel) => match session.admit(Box::new(channel)).await {
                    Ok(_) => {}
                    Err(e) if !e.is_fatal() => warn!(%peer, error = %e, "refused connection"),
                    Err(e) => return Err(e),
                },
                Err(e) => warn!(%peer, error = %e, "failed to set up connection"),
            },
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
            Err(e) => {
                warn!(error = %e, "accept failed");
                return Ok(());
            }
        }
    }
}

fn open_channel(
    stream: std::net::TcpStream,
    send_timeout: Duration,
) -> anyhow::Result<TcpChannel> {
    stream
        .set_nonblocking(true)
        .context("set stream non-blocking")?;
    let stream = TcpStream::from_std(stream).context("register stream")?;
    TcpChannel::new(stream, send_timeout)
}
