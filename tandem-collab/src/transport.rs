//! Stream transport with reconnection.
//!
//! Owns everything between the socket and the client coordinator:
//!
//! ```text
//!  submit()                       ┌───────────────────────────────┐
//!  ────────────► write queue ───► │  connect ─ negotiate ─ drain  │ ──► socket
//!                (survives        │     ▲            │            │
//!                 reconnects)     │     └── backoff ◄┘ on failure │
//!                                 └───────────────────────────────┘
//!  events ◄──────────────────────── framed read loop
//! ```
//!
//! Connection failures (connect, read, write, EOF, negotiation) reset the
//! connection and retry with a doubling delay, 10 ms up to 15 s, reset to
//! the minimum after a successful negotiation. The write queue holds every
//! submission not yet acknowledged; after a reconnect the whole queue is
//! re-sent in order. Wire parse failures inside a session are fatal: the
//! transport reports once and stops.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::sync::{mpsc, RwLock};

use crate::protocol::{
    hello_new, hello_resume, ProtocolError, ServerMessage, SessionGrant, Submission,
};

const BACKOFF_MIN: Duration = Duration::from_millis(10);
const BACKOFF_MAX: Duration = Duration::from_millis(15_000);

/// Transport-level failures. All of these trigger reset + reconnect.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid address spec `{0}`")]
    BadAddress(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("connection closed by server")]
    Eof,
    #[error("negotiation failed: {0}")]
    Negotiation(ProtocolError),
}

/// Where to reach the server.
///
/// Parsed in order: a pure decimal number is a TCP port on localhost; a
/// spec containing `:` is `host:port`; a spec containing `/` is a
/// unix-domain socket path; anything else is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddrSpec {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl AddrSpec {
    pub fn parse(spec: &str) -> Result<Self, TransportError> {
        if !spec.is_empty() && spec.bytes().all(|b| b.is_ascii_digit()) {
            let port = spec
                .parse()
                .map_err(|_| TransportError::BadAddress(spec.to_string()))?;
            return Ok(AddrSpec::Tcp {
                host: "localhost".to_string(),
                port,
            });
        }
        if let Some((host, port)) = spec.rsplit_once(':') {
            let port = port
                .parse()
                .map_err(|_| TransportError::BadAddress(spec.to_string()))?;
            return Ok(AddrSpec::Tcp {
                host: host.to_string(),
                port,
            });
        }
        if spec.contains('/') {
            return Ok(AddrSpec::Unix(PathBuf::from(spec)));
        }
        Err(TransportError::BadAddress(spec.to_string()))
    }
}

/// Observable connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events handed to the coordinator side.
#[derive(Debug)]
pub enum TransportEvent {
    /// Negotiation finished; the snapshot is the authoritative document.
    Connected {
        author_id: u64,
        latest_seq: u64,
        text: String,
        /// False on the first session of this transport, true on resumes.
        resumed: bool,
    },
    /// A framed in-session message.
    Message(ServerMessage),
    /// The connection dropped; a reconnect attempt follows after `delay`.
    Reconnecting { delay: Duration },
    /// A wire parse failure or other unrecoverable protocol problem.
    Fatal(String),
}

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

async fn open_stream(addr: &AddrSpec) -> Result<(BoxedRead, BoxedWrite), TransportError> {
    match addr {
        AddrSpec::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port)).await?;
            let (r, w) = stream.into_split();
            Ok((Box::new(r), Box::new(w)))
        }
        #[cfg(unix)]
        AddrSpec::Unix(path) => {
            let stream = UnixStream::connect(path).await?;
            let (r, w) = stream.into_split();
            Ok((Box::new(r), Box::new(w)))
        }
        #[cfg(not(unix))]
        AddrSpec::Unix(path) => Err(TransportError::BadAddress(path.display().to_string())),
    }
}

/// Read one `\n`-terminated line, without the terminator.
async fn read_line(reader: &mut BufReader<BoxedRead>) -> Result<String, TransportError> {
    let mut buf = Vec::new();
    let n = reader.read_until(b'\n', &mut buf).await?;
    if n == 0 || buf.last() != Some(&b'\n') {
        return Err(TransportError::Eof);
    }
    buf.pop();
    String::from_utf8(buf).map_err(|_| TransportError::Negotiation(ProtocolError::BadUtf8))
}

/// Handle used by the coordinator to push submissions at the transport.
#[derive(Clone)]
pub struct TransportHandle {
    submit_tx: mpsc::UnboundedSender<Submission>,
    state: Arc<RwLock<ConnectionState>>,
}

impl TransportHandle {
    /// Queue a submission. It is written immediately when connected and
    /// held for the next session otherwise.
    pub fn submit(&self, sub: Submission) -> bool {
        self.submit_tx.send(sub).is_ok()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }
}

enum SessionEnd {
    Fatal(String),
    Shutdown,
}

/// The connection task. Created once, consumed by [`Transport::run`].
pub struct Transport {
    addr: AddrSpec,
    display_name: String,
    state: Arc<RwLock<ConnectionState>>,
    event_tx: mpsc::Sender<TransportEvent>,
    submit_rx: mpsc::UnboundedReceiver<Submission>,
    /// Submissions sent but not yet acknowledged, plus anything queued
    /// while disconnected. Survives reconnects.
    write_q: VecDeque<Submission>,
    secret: Option<String>,
    backoff: Duration,
}

impl Transport {
    pub fn new(
        addr: AddrSpec,
        display_name: impl Into<String>,
    ) -> (Self, TransportHandle, mpsc::Receiver<TransportEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (submit_tx, submit_rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));
        let transport = Transport {
            addr,
            display_name: display_name.into(),
            state: state.clone(),
            event_tx,
            submit_rx,
            write_q: VecDeque::new(),
            secret: None,
            backoff: BACKOFF_MIN,
        };
        let handle = TransportHandle { submit_tx, state };
        (transport, handle, event_rx)
    }

    /// Drive the connection until a fatal protocol error or until the
    /// coordinator side goes away.
    pub async fn run(mut self) {
        loop {
            match self.session().await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Fatal(msg)) => {
                    log::error!("fatal protocol error: {msg}");
                    let _ = self.event_tx.send(TransportEvent::Fatal(msg)).await;
                    break;
                }
                Err(err) => {
                    let delay = self.backoff;
                    self.backoff = (self.backoff * 2).min(BACKOFF_MAX);
                    log::warn!("connection lost ({err}); retrying in {delay:?}");
                    *self.state.write().await = ConnectionState::Reconnecting;
                    if self
                        .event_tx
                        .send(TransportEvent::Reconnecting { delay })
                        .await
                        .is_err()
                    {
                        break;
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
        *self.state.write().await = ConnectionState::Disconnected;
    }

    /// One connection lifetime: connect, negotiate, drain and pump.
    /// `Err` means a recoverable transport failure.
    async fn session(&mut self) -> Result<SessionEnd, TransportError> {
        *self.state.write().await = if self.secret.is_none() {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        };

        let (read_half, mut writer) = open_stream(&self.addr).await?;
        self.backoff = BACKOFF_MIN;
        let mut reader = BufReader::new(read_half);

        // Negotiation: one line out, one line in.
        let hello = match &self.secret {
            None => hello_new(&self.display_name),
            Some(secret) => hello_resume(secret),
        };
        writer.write_all(hello.as_bytes()).await?;
        let line = read_line(&mut reader).await?;
        let grant = match SessionGrant::parse(&line) {
            Ok(grant) => grant,
            Err(ProtocolError::ReservedAuthor) => {
                return Ok(SessionEnd::Fatal(
                    ProtocolError::ReservedAuthor.to_string(),
                ));
            }
            Err(err) => return Err(TransportError::Negotiation(err)),
        };

        let resumed = self.secret.is_some();
        self.secret = Some(grant.reconnect_secret.clone());
        *self.state.write().await = ConnectionState::Connected;
        log::info!(
            "negotiated as author {} at seq {} ({} bytes)",
            grant.author_id,
            grant.latest_seq,
            grant.text.len()
        );
        // The snapshot must reach the client before any framed message.
        if self
            .event_tx
            .send(TransportEvent::Connected {
                author_id: grant.author_id,
                latest_seq: grant.latest_seq,
                text: grant.text,
                resumed,
            })
            .await
            .is_err()
        {
            return Ok(SessionEnd::Shutdown);
        }

        // Everything queued from before the reconnect goes out again, in
        // order.
        for sub in &self.write_q {
            writer.write_all(sub.encode().as_bytes()).await?;
        }

        // The line buffer outlives each select round so that bytes read by
        // a cancelled poll are kept for the next one.
        let mut line_buf: Vec<u8> = Vec::new();
        loop {
            tokio::select! {
                sub = self.submit_rx.recv() => {
                    let Some(sub) = sub else {
                        return Ok(SessionEnd::Shutdown);
                    };
                    writer.write_all(sub.encode().as_bytes()).await?;
                    self.write_q.push_back(sub);
                }
                n = reader.read_until(b'\n', &mut line_buf) => {
                    if n? == 0 || line_buf.last() != Some(&b'\n') {
                        return Err(TransportError::Eof);
                    }
                    line_buf.pop();
                    let line = match String::from_utf8(std::mem::take(&mut line_buf)) {
                        Ok(line) => line,
                        Err(_) => {
                            return Ok(SessionEnd::Fatal("message is not valid utf-8".to_string()));
                        }
                    };
                    let msg = match ServerMessage::parse(&line) {
                        Ok(msg) => msg,
                        Err(err) => return Ok(SessionEnd::Fatal(err.to_string())),
                    };
                    if let ServerMessage::Accept { seq } = msg {
                        // The queue only holds unacknowledged submissions;
                        // mismatches are the coordinator's call to make.
                        if self.write_q.front().map(|s| s.seq) == Some(seq) {
                            self.write_q.pop_front();
                        }
                    }
                    if self.event_tx.send(TransportEvent::Message(msg)).await.is_err() {
                        return Ok(SessionEnd::Shutdown);
                    }
                }
            }
        }
    }
}
