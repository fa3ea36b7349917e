//! One duplex socket to one server.
//!
//! A connection owns a writer thread draining an outbound queue and a
//! reader thread correlating framed replies back to callers through a
//! pending-callback map keyed by request id. Callbacks fire on the reader
//! thread and must be short-running.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use basalt_proto::{Header, Message, OpCode, Reply};
use crossbeam::channel::{Receiver, Sender, unbounded};
use tracing::{debug, warn};

use crate::auth::Authenticator;
use crate::cluster::Cluster;
use crate::config::Config;
use crate::error::Error;
use crate::state::{Role, Server};

/// Invoked with the decoded reply, or the failure that made the reply
/// impossible. Runs on the connection's reader thread.
pub type ReplyCallback = Box<dyn FnOnce(Result<Reply, Error>) + Send + 'static>;

/// Lifecycle notifications for pool bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection terminated; it cannot be reopened.
    Closed,
}

/// Why the pending map is being drained.
enum FailureKind {
    Lost(String),
    Decode(String),
    Interrupted,
}

impl FailureKind {
    fn to_error(&self) -> Error {
        match self {
            Self::Lost(msg) => Error::ConnectionLost(msg.clone()),
            Self::Decode(msg) => Error::Decode(msg.clone()),
            Self::Interrupted => Error::Interrupted,
        }
    }
}

struct PendingReply {
    callback: ReplyCallback,
    sent_at: Instant,
}

struct Shared {
    id: u64,
    server: Arc<Server>,
    stream: Mutex<Option<TcpStream>>,
    pending: Mutex<HashMap<i32, PendingReply>>,
    open: AtomicBool,
    shutting_down: AtomicBool,
    closed: Mutex<bool>,
    closed_signal: Condvar,
    event_sent: AtomicBool,
    listeners: Mutex<Vec<Sender<ConnectionEvent>>>,
    orphans: AtomicU64,
    writer_tx: Sender<Vec<u8>>,
}

impl Shared {
    fn fail_pending(&self, kind: &FailureKind) {
        let drained: Vec<PendingReply> = {
            let mut pending = self.pending.lock().expect("poisoned");
            pending.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            (entry.callback)(Err(kind.to_error()));
        }
    }

    /// Single exit point: closes the socket, wakes the writer, publishes
    /// the event, and releases anyone in `wait_for_closed`.
    fn terminate(&self, failure: Option<FailureKind>) {
        let was_open = self.open.swap(false, Ordering::AcqRel);

        if let Some(kind) = &failure {
            self.fail_pending(kind);
        }

        if let Some(stream) = self.stream.lock().expect("poisoned").take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        // An empty frame is the writer's stop sentinel.
        let _ = self.writer_tx.send(Vec::new());

        if was_open && !self.event_sent.swap(true, Ordering::AcqRel) {
            self.listeners
                .lock()
                .expect("poisoned")
                .retain(|tx| tx.send(ConnectionEvent::Closed).is_ok());
        }

        let mut closed = self.closed.lock().expect("poisoned");
        *closed = true;
        self.closed_signal.notify_all();
    }
}

/// A live connection to one server.
pub struct Connection {
    shared: Arc<Shared>,
    request_ids: AtomicI32,
}

static CONNECTION_IDS: AtomicU64 = AtomicU64::new(0);

impl Connection {
    /// Wraps an established socket and starts the reader and writer
    /// threads.
    pub fn open(stream: TcpStream, server: Arc<Server>) -> Result<Connection, Error> {
        let reader_stream = stream.try_clone()?;
        let writer_stream = stream.try_clone()?;
        let (writer_tx, writer_rx) = unbounded::<Vec<u8>>();

        let id = CONNECTION_IDS.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(Shared {
            id,
            server,
            stream: Mutex::new(Some(stream)),
            pending: Mutex::new(HashMap::new()),
            open: AtomicBool::new(true),
            shutting_down: AtomicBool::new(false),
            closed: Mutex::new(false),
            closed_signal: Condvar::new(),
            event_sent: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
            orphans: AtomicU64::new(0),
            writer_tx,
        });

        let writer_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name(format!("basalt-write-{id}"))
            .spawn(move || write_loop(writer_stream, writer_rx, writer_shared))?;

        let reader_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name(format!("basalt-read-{id}"))
            .spawn(move || read_loop(reader_stream, reader_shared))?;

        Ok(Connection {
            shared,
            request_ids: AtomicI32::new(1),
        })
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.shared.server
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::Acquire)
    }

    /// In-flight messages: registered but not yet answered.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().expect("poisoned").len()
    }

    /// Replies that matched no pending request since the connection
    /// opened.
    pub fn orphan_count(&self) -> u64 {
        self.shared.orphans.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> Receiver<ConnectionEvent> {
        let (tx, rx) = unbounded();
        self.shared.listeners.lock().expect("poisoned").push(tx);
        rx
    }

    /// Monotonic per-connection ids, wrapping and never zero.
    fn next_request_id(&self) -> i32 {
        loop {
            let id = self.request_ids.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Frames and enqueues a message. The callback, when present, is
    /// registered before the frame is queued so the reader can never see
    /// a reply for an unregistered id. Every failure is delivered through
    /// the callback.
    pub fn send(&self, message: &dyn Message, callback: Option<ReplyCallback>) {
        if !self.is_open() || self.is_shutting_down() {
            if let Some(callback) = callback {
                callback(Err(Error::ConnectionLost(format!(
                    "connection {} to {} is closed",
                    self.shared.id,
                    self.shared.server.canonical_name()
                ))));
            }
            return;
        }

        // Size-cap enforcement happens here, before any socket write.
        if let Err(e) = message.check_size(self.shared.server.max_document_size()) {
            if let Some(callback) = callback {
                callback(Err(e.into()));
            }
            return;
        }

        let request_id = self.next_request_id();
        let frame = match message.encode(request_id) {
            Ok(frame) => frame,
            Err(e) => {
                if let Some(callback) = callback {
                    callback(Err(e.into()));
                }
                return;
            }
        };

        if let Some(callback) = callback {
            self.shared.pending.lock().expect("poisoned").insert(
                request_id,
                PendingReply {
                    callback,
                    sent_at: Instant::now(),
                },
            );
            // The connection may have terminated between the open check
            // and the insert; a drained map must not regrow.
            if !self.is_open() {
                let entry = self
                    .shared
                    .pending
                    .lock()
                    .expect("poisoned")
                    .remove(&request_id);
                if let Some(entry) = entry {
                    (entry.callback)(Err(Error::ConnectionLost(format!(
                        "connection {} closed during send",
                        self.shared.id
                    ))));
                }
                return;
            }
        }

        if self.shared.writer_tx.send(frame).is_err() {
            // Writer already gone; the pending entry (if any) must fail.
            let entry = self
                .shared
                .pending
                .lock()
                .expect("poisoned")
                .remove(&request_id);
            if let Some(entry) = entry {
                (entry.callback)(Err(Error::ConnectionLost(format!(
                    "connection {} lost before write",
                    self.shared.id
                ))));
            }
        }
    }

    /// Sends two messages back to back on this connection; the callback
    /// observes the second reply. Exists for query-plus-follow-up pairs
    /// that must reach one server.
    pub fn send_pair(
        &self,
        first: &dyn Message,
        second: &dyn Message,
        callback: Option<ReplyCallback>,
    ) {
        self.send(first, None);
        self.send(second, callback);
    }

    /// Stops accepting messages, keeps serving queued writes and pending
    /// replies, and closes once the last reply is in.
    pub fn shutdown(&self) {
        self.shared.shutting_down.store(true, Ordering::Release);
        if self.pending_count() == 0 {
            self.shared.terminate(None);
        }
    }

    /// Hard close: every pending callback fails with *connection-lost*.
    pub fn close(&self) {
        self.shared.terminate(Some(FailureKind::Lost(format!(
            "connection {} closed",
            self.shared.id
        ))));
    }

    /// Hard close on behalf of `Client::close`: pending callbacks fail
    /// with *interrupted*.
    pub(crate) fn interrupt(&self) {
        self.shared.terminate(Some(FailureKind::Interrupted));
    }

    /// Blocks until the connection has fully closed, or the timeout
    /// elapses. Returns true when closed.
    pub fn wait_for_closed(&self, timeout: Duration) -> bool {
        let guard = self.shared.closed.lock().expect("poisoned");
        let (guard, _) = self
            .shared
            .closed_signal
            .wait_timeout_while(guard, timeout, |closed| !*closed)
            .expect("poisoned");
        *guard
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.is_open() {
            self.close();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("server", &self.shared.server.canonical_name())
            .field("open", &self.is_open())
            .field("pending", &self.pending_count())
            .finish()
    }
}

// ── Writer thread ───────────────────────────────────────────

fn write_loop(mut stream: TcpStream, frames: Receiver<Vec<u8>>, shared: Arc<Shared>) {
    while let Ok(frame) = frames.recv() {
        if frame.is_empty() {
            // Stop sentinel from terminate().
            break;
        }
        if let Err(e) = stream.write_all(&frame) {
            debug!(connection = shared.id, error = %e, "write failed");
            shared.terminate(Some(FailureKind::Lost(format!("write failed: {e}"))));
            break;
        }
    }
}

// ── Reader thread ───────────────────────────────────────────

fn read_loop(mut stream: TcpStream, shared: Arc<Shared>) {
    loop {
        let mut header_bytes = [0u8; Header::SIZE];
        if let Err(e) = stream.read_exact(&mut header_bytes) {
            on_read_end(&shared, &e);
            return;
        }

        let header = match Header::read(&header_bytes) {
            Ok(header) => header,
            Err(e) => {
                shared.terminate(Some(FailureKind::Decode(e.to_string())));
                return;
            }
        };
        if header.op_code != OpCode::Reply {
            shared.terminate(Some(FailureKind::Decode(format!(
                "unexpected op code from server: {:?}",
                header.op_code
            ))));
            return;
        }

        let mut body = vec![0u8; header.body_len()];
        if let Err(e) = stream.read_exact(&mut body) {
            // Mid-frame EOF is a framing failure, not a clean close.
            shared.terminate(Some(FailureKind::Decode(format!(
                "short read inside frame: {e}"
            ))));
            return;
        }

        let reply = match Reply::read(&header, &body) {
            Ok(reply) => reply,
            Err(e) => {
                shared.terminate(Some(FailureKind::Decode(e.to_string())));
                return;
            }
        };

        dispatch(&shared, reply);

        if shared.shutting_down.load(Ordering::Acquire)
            && shared.pending.lock().expect("poisoned").is_empty()
        {
            shared.terminate(None);
            return;
        }
    }
}

/// Routes one reply to exactly one waiting callback. Unclaimed replies
/// are logged and counted, never delivered twice.
fn dispatch(shared: &Shared, reply: Reply) {
    let entry = shared
        .pending
        .lock()
        .expect("poisoned")
        .remove(&reply.response_to);
    match entry {
        Some(entry) => {
            let nanos = u64::try_from(entry.sent_at.elapsed().as_nanos()).unwrap_or(u64::MAX);
            shared.server.update_latency(nanos);
            (entry.callback)(Ok(reply));
        }
        None => {
            shared.orphans.fetch_add(1, Ordering::Relaxed);
            warn!(
                connection = shared.id,
                response_to = reply.response_to,
                "reply matched no pending request; dropping"
            );
        }
    }
}

fn on_read_end(shared: &Shared, error: &std::io::Error) {
    let draining = shared.shutting_down.load(Ordering::Acquire)
        && shared.pending.lock().expect("poisoned").is_empty();
    let already_closed = !shared.open.load(Ordering::Acquire);
    if draining || already_closed {
        shared.terminate(None);
    } else if error.kind() == ErrorKind::UnexpectedEof {
        shared.terminate(Some(FailureKind::Lost("server closed the socket".into())));
    } else {
        shared.terminate(Some(FailureKind::Lost(format!("read failed: {error}"))));
    }
}

// ── Factory ─────────────────────────────────────────────────

/// Creates ready-to-use connections: TCP connect, then the pluggable
/// authenticator, then hand-off to the pool.
pub trait ConnectionFactory: Send + Sync {
    /// Connects to the most appropriate server in the cluster.
    fn connect(&self) -> Result<Connection, Error>;

    /// Connects to one specific server.
    fn connect_to(&self, server: &Arc<Server>) -> Result<Connection, Error>;
}

pub struct TcpConnectionFactory {
    cluster: Arc<Cluster>,
    authenticator: Arc<dyn Authenticator>,
    connect_timeout: Duration,
}

impl TcpConnectionFactory {
    pub fn new(cluster: Arc<Cluster>, config: &Config, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            cluster,
            authenticator,
            connect_timeout: config.connect_timeout,
        }
    }

    fn try_address(&self, server: &Arc<Server>, address: &str) -> Result<Connection, Error> {
        let resolved = address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::CannotConnect(format!("{address} did not resolve")))?;
        let stream = if self.connect_timeout.is_zero() {
            TcpStream::connect(resolved)?
        } else {
            TcpStream::connect_timeout(&resolved, self.connect_timeout)?
        };
        stream.set_nodelay(true)?;
        server.connection_opened(address);

        let connection = Connection::open(stream, Arc::clone(server))?;
        if let Err(e) = self.authenticator.authenticate(&connection) {
            connection.close();
            return Err(Error::AuthFailed(e.to_string()));
        }
        Ok(connection)
    }
}

impl ConnectionFactory for TcpConnectionFactory {
    fn connect(&self) -> Result<Connection, Error> {
        // Writable servers first, then lowest observed latency; servers
        // never probed sort after known ones but stay reachable.
        let mut servers = self.cluster.servers();
        servers.sort_by(|a, b| {
            let rank = |s: &Arc<Server>| match s.role() {
                Role::Writable => 0u8,
                Role::ReadOnly => 1,
                Role::Unknown => 2,
                Role::Unavailable => 3,
            };
            rank(a).cmp(&rank(b)).then_with(|| {
                a.average_latency_millis()
                    .total_cmp(&b.average_latency_millis())
            })
        });

        let mut last_error = None;
        for server in &servers {
            match self.connect_to(server) {
                Ok(connection) => return Ok(connection),
                Err(e) => {
                    debug!(server = %server.canonical_name(), error = %e, "connect failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            Error::CannotConnect("no servers in the cluster".to_string())
        }))
    }

    fn connect_to(&self, server: &Arc<Server>) -> Result<Connection, Error> {
        let mut last_error = None;
        for address in server.addresses() {
            match self.try_address(server, &address) {
                Ok(connection) => return Ok(connection),
                Err(e @ Error::AuthFailed(_)) => return Err(e),
                Err(e) => last_error = Some(e),
            }
        }
        server.connect_failed();
        Err(last_error.unwrap_or_else(|| {
            Error::CannotConnect(format!("no addresses for {}", server.canonical_name()))
        }))
    }
}
