//! The client: a pool of connections, the pick ladder that assigns one to
//! each outgoing message, and the reconnect machinery.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use basalt_proto::{Message, ReadPreference, ReadPreferenceMode, probe};
use tracing::{debug, info, warn};

use crate::auth::{Authenticator, NoAuth};
use crate::cluster::{Cluster, ClusterKind, ReconnectStrategy, reconnect_strategy};
use crate::config::Config;
use crate::connection::{
    Connection, ConnectionEvent, ConnectionFactory, ReplyCallback, TcpConnectionFactory,
};
use crate::error::Error;
use crate::state::Role;

/// The basalt client. All requests pass through here.
///
/// Cheap to clone and safe to share; callers may invoke `send` from any
/// number of threads concurrently.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: Config,
    /// Mutable cap so the pool can be resized at runtime; the rotation
    /// shrinks on the next `send`.
    max_connections: AtomicUsize,
    cluster: Arc<Cluster>,
    factory: Arc<dyn ConnectionFactory>,
    strategy: Arc<dyn ReconnectStrategy>,
    /// Snapshot-copy-on-write rotation; readers never take a lock.
    connections: ArcSwap<Vec<Arc<Connection>>>,
    /// Connections asked to shut down but still serving in-flight
    /// replies.
    draining: Mutex<Vec<Arc<Connection>>>,
    /// Guards pool growth and shrink (the connection-factory lock).
    create_lock: Mutex<()>,
    /// Shared scan cursor for the pick ladder.
    sequence: AtomicU64,
    /// Count of reconnect attempts in flight, with a condition variable
    /// to wake `send` callers waiting on one.
    active_reconnects: Mutex<usize>,
    reconnect_done: Condvar,
    closed: AtomicBool,
    /// Back-reference for watcher and probe threads.
    self_weak: Mutex<Weak<ClientInner>>,
}

impl Client {
    /// Connects lazily: the pool is empty until the first `send`.
    pub fn new(config: Config) -> Client {
        Self::with_authenticator(config, Arc::new(NoAuth))
    }

    pub fn with_authenticator(config: Config, authenticator: Arc<dyn Authenticator>) -> Client {
        let cluster = Arc::new(Cluster::new(config.cluster_kind));
        for seed in &config.seeds {
            cluster.add(seed);
        }
        let factory: Arc<dyn ConnectionFactory> = Arc::new(TcpConnectionFactory::new(
            Arc::clone(&cluster),
            &config,
            authenticator,
        ));
        Self::with_factory(config, cluster, factory)
    }

    /// Seam for tests and custom transports.
    pub fn with_factory(
        config: Config,
        cluster: Arc<Cluster>,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Client {
        let strategy = reconnect_strategy(
            config.cluster_kind,
            Arc::clone(&cluster),
            Arc::clone(&factory),
        );
        let inner = Arc::new(ClientInner {
            max_connections: AtomicUsize::new(config.max_connections),
            config,
            cluster,
            factory,
            strategy,
            connections: ArcSwap::from_pointee(Vec::new()),
            draining: Mutex::new(Vec::new()),
            create_lock: Mutex::new(()),
            sequence: AtomicU64::new(0),
            active_reconnects: Mutex::new(0),
            reconnect_done: Condvar::new(),
            closed: AtomicBool::new(false),
            self_weak: Mutex::new(Weak::new()),
        });
        spawn_probe_loop(&inner);
        Client { inner }
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.inner.cluster
    }

    pub fn cluster_kind(&self) -> ClusterKind {
        self.inner.cluster.kind()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.load().len()
    }

    /// Lowering the cap marks excess connections (oldest first) for a
    /// graceful shutdown on the next `send`.
    pub fn set_max_connections(&self, max: usize) {
        self.inner.max_connections.store(max, Ordering::Release);
    }

    /// Sends one message. Connection-selection failures are returned;
    /// everything later (socket loss, decode failures, server errors)
    /// reaches the callback.
    pub fn send(
        &self,
        message: &dyn Message,
        callback: Option<ReplyCallback>,
    ) -> Result<(), Error> {
        let connection = self.inner.find_connection(&[message.read_preference()])?;
        connection.send(message, callback);
        Ok(())
    }

    /// Sends two messages on one connection; the callback observes the
    /// second reply. Exists for query-plus-follow-up pairs.
    pub fn send_pair(
        &self,
        first: &dyn Message,
        second: &dyn Message,
        callback: Option<ReplyCallback>,
    ) -> Result<(), Error> {
        let connection = self
            .inner
            .find_connection(&[first.read_preference(), second.read_preference()])?;
        connection.send_pair(first, second, callback);
        Ok(())
    }

    /// Runs one status-probe round immediately.
    pub fn probe(&self) {
        self.inner.probe();
    }

    /// Shuts every connection down, draining in-flight replies for up to
    /// the configured read timeout each, then force-closes stragglers.
    /// Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connections", &self.connection_count())
            .field("cluster", &self.inner.cluster)
            .finish()
    }
}

impl ClientInner {
    fn limit(&self) -> usize {
        self.max_connections.load(Ordering::Acquire).max(1)
    }

    // ── The pick ladder ─────────────────────────────────────────

    /// Chooses a connection for a message pair:
    ///
    /// 1. scan up to `connection_scan` rotation slots for an idle,
    ///    eligible connection;
    /// 2. grow the pool under the factory lock;
    /// 3. rescan for the least-loaded eligible connection;
    /// 4. wait for an in-flight reconnect and start over.
    ///
    /// The ladder never blocks on one connection's queue; it prefers to
    /// grow or diffuse load.
    fn find_connection(
        &self,
        preferences: &[Option<&ReadPreference>],
    ) -> Result<Arc<Connection>, Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::CannotConnect("client is closed".to_string()));
        }

        let mut wait_allowed = true;
        loop {
            let limit = self.limit();
            self.shrink_to(limit);

            if let Some(connection) = self.scan_idle(preferences) {
                return Ok(connection);
            }
            if let Some(connection) = self.try_create(limit) {
                return Ok(connection);
            }
            if let Some(connection) = self.least_loaded(preferences) {
                return Ok(connection);
            }
            if wait_allowed && self.wait_for_reconnect() {
                // A reconnect finished (or the wait timed out with the
                // pool possibly repaired); run the ladder once more.
                wait_allowed = false;
                continue;
            }
            return Err(Error::CannotConnect(
                "no eligible connection and the pool cannot grow".to_string(),
            ));
        }
    }

    fn eligible(connection: &Connection, preference: Option<&ReadPreference>) -> bool {
        if !connection.is_open() || connection.is_shutting_down() {
            return false;
        }
        let server = connection.server();
        match preference {
            // Writes must reach a writable server; an unprobed one gets
            // the benefit of the doubt until the first reply says no.
            None => matches!(server.role(), Role::Writable | Role::Unknown),
            Some(preference) => {
                let role_ok = match server.role() {
                    Role::Writable => preference.allows(true),
                    Role::ReadOnly => preference.allows(false),
                    Role::Unknown => true,
                    Role::Unavailable => false,
                };
                role_ok && preference.matches_tags(server.tags().as_ref())
            }
        }
    }

    /// One slot per message; a `None` slot is a write and reads as
    /// "writable required".
    fn eligible_for_all(
        connection: &Connection,
        preferences: &[Option<&ReadPreference>],
    ) -> bool {
        preferences
            .iter()
            .all(|preference| Self::eligible(connection, *preference))
    }

    fn wants_nearest(preferences: &[Option<&ReadPreference>]) -> bool {
        preferences
            .iter()
            .flatten()
            .any(|p| p.mode() == ReadPreferenceMode::Nearest)
    }

    /// Ladder step 1: a bounded scan for an idle connection, walking the
    /// rotation by a shared cursor so load spreads across callers.
    fn scan_idle(&self, preferences: &[Option<&ReadPreference>]) -> Option<Arc<Connection>> {
        let rotation = self.connections.load();
        if rotation.is_empty() {
            return None;
        }
        let to_scan = rotation.len().min(self.config.connection_scan);
        let mut nearest: Option<Arc<Connection>> = None;

        for _ in 0..to_scan {
            let at = (self.sequence.fetch_add(1, Ordering::Relaxed) % rotation.len() as u64)
                as usize;
            let connection = &rotation[at];
            if connection.pending_count() != 0
                || !Self::eligible_for_all(connection, preferences)
            {
                continue;
            }
            if !Self::wants_nearest(preferences) {
                return Some(Arc::clone(connection));
            }
            // Nearest: keep the lowest-latency idle candidate in the
            // window.
            let better = nearest.as_ref().is_none_or(|best| {
                connection.server().average_latency_millis()
                    < best.server().average_latency_millis()
            });
            if better {
                nearest = Some(Arc::clone(connection));
            }
        }
        nearest
    }

    /// Ladder step 2: grow the pool by one connection, under the factory
    /// lock. Factory failures log and fall through to the next step.
    fn try_create(&self, limit: usize) -> Option<Arc<Connection>> {
        if self.connections.load().len() >= limit {
            return None;
        }
        let _guard = self.create_lock.lock().expect("poisoned");
        if self.connections.load().len() >= limit {
            return None;
        }
        match self.factory.connect() {
            Ok(connection) => {
                let connection = Arc::new(connection);
                self.watch(&connection);
                self.add_to_rotation(Arc::clone(&connection));
                debug!(connection = connection.id(), "pool grew");
                Some(connection)
            }
            Err(e) => {
                warn!(error = %e, "could not create a connection");
                None
            }
        }
    }

    /// Ladder step 3: rescan and take the eligible connection with the
    /// fewest in-flight messages.
    fn least_loaded(&self, preferences: &[Option<&ReadPreference>]) -> Option<Arc<Connection>> {
        let rotation = self.connections.load();
        if rotation.is_empty() {
            return None;
        }
        let to_scan = rotation.len().min(self.config.connection_scan);
        let mut best: Option<(usize, Arc<Connection>)> = None;

        for _ in 0..to_scan {
            let at = (self.sequence.fetch_add(1, Ordering::Relaxed) % rotation.len() as u64)
                as usize;
            let connection = &rotation[at];
            if !Self::eligible_for_all(connection, preferences) {
                continue;
            }
            let pending = connection.pending_count();
            if best.as_ref().is_none_or(|(least, _)| pending < *least) {
                best = Some((pending, Arc::clone(connection)));
            }
        }
        best.map(|(_, connection)| connection)
    }

    /// Ladder step 4: when a reconnect is in flight, wait for it (bounded
    /// by the reconnect timeout; zero waits indefinitely). Returns true
    /// when there was a reconnect to wait on.
    fn wait_for_reconnect(&self) -> bool {
        let mut active = self.active_reconnects.lock().expect("poisoned");
        if *active == 0 {
            return false;
        }
        debug!("waiting for reconnect");
        let timeout = self.config.reconnect_timeout;
        if timeout.is_zero() {
            while *active > 0 {
                active = self.reconnect_done.wait(active).expect("poisoned");
            }
        } else {
            let deadline = Instant::now() + timeout;
            while *active > 0 {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let (guard, _) = self
                    .reconnect_done
                    .wait_timeout(active, deadline - now)
                    .expect("poisoned");
                active = guard;
            }
        }
        true
    }

    // ── Rotation bookkeeping ────────────────────────────────────

    fn add_to_rotation(&self, connection: Arc<Connection>) {
        self.connections.rcu(|rotation| {
            let mut next = (**rotation).clone();
            next.push(Arc::clone(&connection));
            next
        });
    }

    fn remove_from_rotation(&self, id: u64) -> bool {
        let had = self.connections.load().iter().any(|c| c.id() == id);
        if had {
            self.connections.rcu(|rotation| {
                rotation
                    .iter()
                    .filter(|c| c.id() != id)
                    .cloned()
                    .collect::<Vec<_>>()
            });
        }
        had
    }

    /// Moves connections beyond the cap (oldest first) to the draining
    /// list; they keep serving in-flight replies until empty.
    fn shrink_to(&self, limit: usize) {
        if self.connections.load().len() <= limit {
            return;
        }
        let _guard = self.create_lock.lock().expect("poisoned");
        while self.connections.load().len() > limit {
            let Some(oldest) = self.connections.load().first().cloned() else {
                break;
            };
            self.remove_from_rotation(oldest.id());
            info!(connection = oldest.id(), "shrinking pool");
            self.draining.lock().expect("poisoned").push(Arc::clone(&oldest));
            oldest.shutdown();
        }
    }

    /// Watches the connection's event stream; `open → false` triggers the
    /// reconnect path.
    fn watch(&self, connection: &Arc<Connection>) {
        let events = connection.subscribe();
        let weak = self.weak_self();
        let watched = Arc::clone(connection);
        let result = thread::Builder::new()
            .name(format!("basalt-watch-{}", watched.id()))
            .spawn(move || {
                if let Ok(ConnectionEvent::Closed) = events.recv()
                    && let Some(inner) = weak.upgrade()
                {
                    inner.handle_connection_closed(&watched);
                }
            });
        if let Err(e) = result {
            warn!(error = %e, "could not spawn connection watcher");
        }
    }

    fn handle_connection_closed(&self, connection: &Arc<Connection>) {
        if self.closed.load(Ordering::Acquire) {
            self.remove_from_rotation(connection.id());
            self.draining
                .lock()
                .expect("poisoned")
                .retain(|c| c.id() != connection.id());
            return;
        }

        if self.connections.load().iter().any(|c| c.id() == connection.id()) {
            info!(
                connection = connection.id(),
                server = %connection.server().canonical_name(),
                "connection closed unexpectedly; attempting reconnect"
            );
            self.reconnect(connection);
        } else {
            let mut draining = self.draining.lock().expect("poisoned");
            let before = draining.len();
            draining.retain(|c| c.id() != connection.id());
            if draining.len() == before {
                debug!(connection = connection.id(), "unknown connection closed");
            }
        }
    }

    /// Replaces a lost connection via the cluster's reconnect strategy.
    /// In-flight requests were already failed by the connection itself;
    /// they are never retried here.
    fn reconnect(&self, lost: &Arc<Connection>) {
        {
            let mut active = self.active_reconnects.lock().expect("poisoned");
            *active += 1;
        }

        lost.server().connection_terminated();
        let replacement = self.strategy.reconnect(lost);
        self.remove_from_rotation(lost.id());
        match replacement {
            Some(connection) => {
                let connection = Arc::new(connection);
                info!(
                    connection = connection.id(),
                    server = %connection.server().canonical_name(),
                    "reconnected"
                );
                self.watch(&connection);
                self.add_to_rotation(connection);
            }
            None => {
                warn!(
                    server = %lost.server().canonical_name(),
                    "reconnect failed; connection dropped from the pool"
                );
            }
        }

        let mut active = self.active_reconnects.lock().expect("poisoned");
        *active -= 1;
        self.reconnect_done.notify_all();
    }

    // ── Probing ─────────────────────────────────────────────────

    /// One status-probe round: `ismaster` on every pooled connection,
    /// plus `buildinfo` where the version is stale. Replies feed the
    /// server records and cluster discovery.
    fn probe(&self) {
        for connection in self.connections.load().iter() {
            let server = Arc::clone(connection.server());
            let cluster = Arc::clone(&self.cluster);
            let callback: ReplyCallback = Box::new(move |result| match result {
                Ok(reply) => {
                    if let Some(doc) = reply.documents.first() {
                        server.update(doc);
                        cluster.discover(doc);
                    }
                }
                Err(_) => server.request_failed(),
            });
            connection.send(&probe::is_master(), Some(callback));

            if connection.server().need_build_info() {
                let server = Arc::clone(connection.server());
                let callback: ReplyCallback = Box::new(move |result| {
                    if let Ok(reply) = result
                        && let Some(doc) = reply.documents.first()
                    {
                        server.update(doc);
                    }
                });
                connection.send(&probe::build_info(), Some(callback));
            }
        }
    }

    // ── Shutdown ────────────────────────────────────────────────

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        loop {
            let rotation = self.connections.load_full();
            if rotation.is_empty() {
                break;
            }
            for connection in rotation.iter() {
                self.remove_from_rotation(connection.id());
                self.draining
                    .lock()
                    .expect("poisoned")
                    .push(Arc::clone(connection));
                connection.shutdown();
            }
        }

        let draining = self.draining.lock().expect("poisoned").clone();
        for connection in draining {
            if !connection.wait_for_closed(self.config.read_timeout) {
                // Grace period elapsed; anything still pending fails
                // with *interrupted*.
                connection.interrupt();
            }
        }
        self.draining.lock().expect("poisoned").clear();
    }

    fn weak_self(&self) -> Weak<ClientInner> {
        // Reconstituted from the probe loop's registration; see
        // spawn_probe_loop.
        self.self_weak
            .lock()
            .expect("poisoned")
            .clone()
    }
}

fn spawn_probe_loop(inner: &Arc<ClientInner>) {
    let weak = Arc::downgrade(inner);
    *inner.self_weak.lock().expect("poisoned") = Weak::clone(&weak);

    let interval = inner.config.probe_interval;
    let result = thread::Builder::new()
        .name("basalt-probe".to_string())
        .spawn(move || {
            loop {
                // Sleep in short steps so client shutdown is noticed
                // promptly.
                let deadline = Instant::now() + interval;
                while Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(100).min(interval));
                    match weak.upgrade() {
                        Some(inner) if !inner.closed.load(Ordering::Acquire) => {}
                        _ => return,
                    }
                }
                let Some(inner) = weak.upgrade() else { return };
                if inner.closed.load(Ordering::Acquire) {
                    return;
                }
                inner.probe();
            }
        });
    if let Err(e) = result {
        warn!(error = %e, "could not spawn probe loop");
    }
}
