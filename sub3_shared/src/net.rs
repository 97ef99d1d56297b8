//! Networking primitives.
//!
//! Goals:
//! - Length-prefixed, versioned frames carrying one `Message` each.
//! - A `ClientChannel` contract the server loop consumes without knowing about
//!   sockets, so tests can substitute scripted channels.
//! - A TCP implementation of that contract, plus a plain framed connection
//!   for the client side.

use std::{collections::VecDeque, net::SocketAddr, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::mpsc,
    task::JoinHandle,
    time,
};
use tracing::{debug, warn};

use crate::message::Message;

/// Protocol version stamped on every frame.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest accepted frame payload. Guards against bogus length prefixes.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Failures while reading or writing a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame io: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame too large: {0} bytes (max {max})", max = MAX_FRAME_SIZE)]
    TooLarge(usize),
    #[error("protocol version mismatch: expected {expected}, got {0}", expected = PROTOCOL_VERSION)]
    Version(u32),
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl FrameError {
    /// True when the peer simply went away.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, FrameError::Io(e) if matches!(
            e.kind(),
            std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
        ))
    }
}

#[derive(Serialize)]
struct OutFrame<'a> {
    version: u32,
    message: &'a Message,
}

#[derive(Deserialize)]
struct InFrame {
    version: u32,
    message: Message,
}

/// Encodes one message as a complete frame: big-endian length, then JSON.
pub fn encode_frame(msg: &Message) -> Result<Bytes, FrameError> {
    let payload = serde_json::to_vec(&OutFrame {
        version: PROTOCOL_VERSION,
        message: msg,
    })?;
    if payload.len() > MAX_FRAME_SIZE as usize {
        return Err(FrameError::TooLarge(payload.len()));
    }
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    Ok(buf.freeze())
}

/// Decodes a frame payload (without its length prefix).
pub fn decode_payload(payload: &[u8]) -> Result<Message, FrameError> {
    let frame: InFrame = serde_json::from_slice(payload)?;
    if frame.version != PROTOCOL_VERSION {
        return Err(FrameError::Version(frame.version));
    }
    Ok(frame.message)
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &Message,
) -> Result<(), FrameError> {
    let frame = encode_frame(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message, FrameError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(len as usize));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    decode_payload(&payload)
}

/// Per-connection channel consumed by the server loop.
///
/// `send` failing once is treated as connection loss; there is no retry.
#[async_trait]
pub trait ClientChannel: Send {
    /// Moves whatever has arrived since the last call into the pending queue.
    /// The server calls this once per frame, so a frame only sees what was
    /// received before it started. Never blocks.
    fn poll_inbound(&mut self) {}

    /// Whether at least one inbound message is ready. Never blocks.
    fn has_pending_message(&mut self) -> bool;

    /// Takes the next ready inbound message, if any. Never blocks.
    fn receive_one(&mut self) -> Option<Message>;

    /// Whether the inbound stream delivered something undecodable.
    fn is_broken(&self) -> bool {
        false
    }

    /// Delivers one message.
    async fn send(&mut self, msg: &Message) -> anyhow::Result<()>;

    /// Remote address for logs.
    fn peer(&self) -> String;
}

type Inbound = Result<Message, FrameError>;

/// Decodes frames from `reader` on a background task. The queue closes when
/// the peer disconnects; a decode failure is delivered once and then closes
/// it too.
fn spawn_reader(
    mut reader: OwnedReadHalf,
    peer: SocketAddr,
) -> (mpsc::UnboundedReceiver<Inbound>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        loop {
            match read_frame(&mut reader).await {
                Ok(msg) => {
                    if tx.send(Ok(msg)).is_err() {
                        break;
                    }
                }
                Err(e) if e.is_disconnect() => {
                    debug!(%peer, "inbound stream closed");
                    break;
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    });
    (rx, task)
}

/// `ClientChannel` over a TCP stream.
///
/// A background task decodes inbound frames into a queue; `poll_inbound`
/// moves them into the pending queue the server drains. Sends write directly to
/// the socket under a timeout.
pub struct TcpChannel {
    writer: OwnedWriteHalf,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    pending: VecDeque<Message>,
    broken: bool,
    send_timeout: Duration,
    peer: SocketAddr,
    reader: JoinHandle<()>,
}

impl TcpChannel {
    /// Wraps an accepted stream. Must be called inside a tokio runtime.
    pub fn new(stream: TcpStream, send_timeout: Duration) -> anyhow::Result<Self> {
        let peer = stream.peer_addr().context("peer addr")?;
        stream.set_nodelay(true).context("set nodelay")?;
        let (read_half, writer) = stream.into_split();
        let (inbound, reader) = spawn_reader(read_half, peer);
        Ok(Self {
            writer,
            inbound,
            pending: VecDeque::new(),
            broken: false,
            send_timeout,
            peer,
            reader,
        })
    }

}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl ClientChannel for TcpChannel {
    fn poll_inbound(&mut self) {
        while let Ok(event) = self.inbound.try_recv() {
            match event {
                Ok(msg) => self.pending.push_back(msg),
                Err(e) => {
                    warn!(peer = %self.peer, error = %e, "malformed inbound frame");
                    self.broken = true;
                }
            }
        }
    }

    fn has_pending_message(&mut self) -> bool {
        !self.pending.is_empty()
    }

    fn receive_one(&mut self) -> Option<Message> {
        self.pending.pop_front()
    }

    fn is_broken(&self) -> bool {
        self.broken
    }

    async fn send(&mut self, msg: &Message) -> anyhow::Result<()> {
        time::timeout(self.send_timeout, write_frame(&mut self.writer, msg))
            .await
            .with_context(|| format!("send {} timed out", msg.name()))?
            .with_context(|| format!("send {}", msg.name()))
    }

    fn peer(&self) -> String {
        self.peer.to_string()
    }
}

/// Framed connection used by clients.
///
/// Receiving goes through a background reader, so `recv_timeout` can give up
/// without losing half a frame.
pub struct FramedConn {
    writer: OwnedWriteHalf,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    peer: SocketAddr,
    reader: JoinHandle<()>,
}

impl FramedConn {
    /// Must be called inside a tokio runtime.
    pub fn new(stream: TcpStream) -> anyhow::Result<Self> {
        let peer = stream.peer_addr().context("peer addr")?;
        let (read_half, writer) = stream.into_split();
        let (inbound, reader) = spawn_reader(read_half, peer);
        Ok(Self {
            writer,
            inbound,
            peer,
            reader,
        })
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        stream.set_nodelay(true).context("set nodelay")?;
        Self::new(stream)
    }

    pub async fn send(&mut self, msg: &Message) -> anyhow::Result<()> {
        write_frame(&mut self.writer, msg)
            .await
            .context("tcp write")
    }

    pub async fn recv(&mut self) -> anyhow::Result<Message> {
        match self.inbound.recv().await {
            Some(frame) => frame.context("tcp read"),
            None => anyhow::bail!("connection closed"),
        }
    }

    /// Receives a message within the given timeout.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> anyhow::Result<Option<Message>> {
        match time::timeout(timeout, self.recv()).await {
            Ok(res) => res.map(Some),
            Err(_) => Ok(None),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Drop for FramedConn {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
