//! Per-server state tracking, driven by status-probe replies.

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use basalt_bson::{Document, PathMatcher, Value};
use crossbeam::channel::{Receiver, Sender, unbounded};

use crate::version::Version;

/// Default server port when a seed omits one.
pub const DEFAULT_PORT: u16 = 27017;

/// Default cap on a single document, until the server reports its own.
pub const MAX_DOCUMENT_SIZE_DEFAULT: usize = 16 * 1024 * 1024;

/// Default cap on operations per batched-write command.
pub const MAX_BATCHED_WRITES_DEFAULT: usize = 1000;

/// Latency decay window, in samples.
const DECAY_SAMPLES: f64 = 1000.0;
const DECAY_ALPHA: f64 = 2.0 / (DECAY_SAMPLES + 1.0);
const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// Re-probe `buildinfo` when the version is older than this.
const VERSION_PROBE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Sentinel for "no latency sample yet".
const LATENCY_UNKNOWN: f64 = f64::MAX;
/// Sentinel for "replication lag unknown".
const LAG_UNKNOWN: f64 = f64::MAX;
/// Sentinel set when a status request fails outright.
const LAG_REQUEST_FAILED: f64 = i32::MAX as f64;

/// What the server can do for us right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Standalone, replica-set primary, or router: accepts writes.
    Writable,
    /// Actively replicating secondary: reads only.
    ReadOnly,
    /// Reachable but in no usable state, or unreachable.
    Unavailable,
    /// Never probed, or all connections lost.
    Unknown,
}

impl Role {
    fn code(self) -> u8 {
        match self {
            Role::Writable => 0,
            Role::ReadOnly => 1,
            Role::Unavailable => 2,
            Role::Unknown => 3,
        }
    }

    fn from_code(code: u8) -> Role {
        match code {
            0 => Role::Writable,
            1 => Role::ReadOnly,
            2 => Role::Unavailable,
            _ => Role::Unknown,
        }
    }
}

/// A typed `(field, old, new)` property change, published to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Role { old: Role, new: Role },
    Lag { old: Option<f64>, new: Option<f64> },
    Tags { old: Option<Document>, new: Option<Document> },
    CanonicalName { old: String, new: String },
    Version { old: Version, new: Version },
    MaxDocumentSize { old: usize, new: usize },
    MaxBatchedWrites { old: usize, new: usize },
}

/// Mutable record for one server in the cluster.
///
/// Scalar fields are atomics so readers never block; compound fields sit
/// behind their own mutexes. Compound reads across fields are only
/// approximately coherent, which is all server selection needs.
pub struct Server {
    /// Normalized `host:port` the caller seeded us with. Never changes.
    canonical_address: String,
    /// The name the server reports for itself; starts as the seed name.
    canonical_name: Mutex<String>,
    /// Last address that connected successfully; cleared on failure.
    working_address: Mutex<Option<String>>,
    role: AtomicU8,
    /// f64 bits; seconds behind the primary.
    seconds_behind: AtomicU64,
    /// f64 bits; exponentially-smoothed request latency in milliseconds.
    latency: AtomicU64,
    tags: Mutex<Option<Document>>,
    version: Mutex<Version>,
    last_version_probe: Mutex<Option<Instant>>,
    max_document_size: AtomicUsize,
    max_batched_writes: AtomicUsize,
    listeners: Mutex<Vec<Sender<ServerEvent>>>,
}

/// Appends the default port when the seed has none.
pub fn normalize_address(address: &str) -> String {
    if address.contains(':') {
        address.to_string()
    } else {
        format!("{address}:{DEFAULT_PORT}")
    }
}

impl Server {
    /// Package-private by convention: servers are created through the
    /// cluster so names stay deduplicated.
    pub(crate) fn new(address: &str) -> Self {
        let canonical_address = normalize_address(address);
        Self {
            canonical_name: Mutex::new(canonical_address.clone()),
            canonical_address,
            working_address: Mutex::new(None),
            role: AtomicU8::new(Role::Unknown.code()),
            seconds_behind: AtomicU64::new(LAG_UNKNOWN.to_bits()),
            latency: AtomicU64::new(LATENCY_UNKNOWN.to_bits()),
            tags: Mutex::new(None),
            version: Mutex::new(Version::UNKNOWN),
            last_version_probe: Mutex::new(None),
            max_document_size: AtomicUsize::new(MAX_DOCUMENT_SIZE_DEFAULT),
            max_batched_writes: AtomicUsize::new(MAX_BATCHED_WRITES_DEFAULT),
            listeners: Mutex::new(Vec::new()),
        }
    }

    // ── Accessors ───────────────────────────────────────────────

    pub fn canonical_address(&self) -> &str {
        &self.canonical_address
    }

    pub fn canonical_name(&self) -> String {
        self.canonical_name.lock().expect("poisoned").clone()
    }

    /// Addresses to try when connecting: the working address first, then
    /// the canonical one.
    pub fn addresses(&self) -> Vec<String> {
        let working = self.working_address.lock().expect("poisoned").clone();
        match working {
            Some(addr) if addr != self.canonical_address => {
                vec![addr, self.canonical_address.clone()]
            }
            _ => vec![self.canonical_address.clone()],
        }
    }

    pub fn role(&self) -> Role {
        Role::from_code(self.role.load(Ordering::Acquire))
    }

    pub fn is_writable(&self) -> bool {
        self.role() == Role::Writable
    }

    /// Seconds behind the primary; `None` until a probe reports it.
    pub fn seconds_behind(&self) -> Option<f64> {
        let raw = f64::from_bits(self.seconds_behind.load(Ordering::Acquire));
        if raw == LAG_UNKNOWN || raw == LAG_REQUEST_FAILED {
            None
        } else {
            Some(raw)
        }
    }

    /// Smoothed request latency in milliseconds; the sentinel
    /// [`f64::MAX`] means no sample has arrived yet.
    pub fn average_latency_millis(&self) -> f64 {
        f64::from_bits(self.latency.load(Ordering::Acquire))
    }

    pub fn tags(&self) -> Option<Document> {
        self.tags.lock().expect("poisoned").clone()
    }

    pub fn version(&self) -> Version {
        self.version.lock().expect("poisoned").clone()
    }

    pub fn max_document_size(&self) -> usize {
        self.max_document_size.load(Ordering::Acquire)
    }

    pub fn max_batched_writes(&self) -> usize {
        self.max_batched_writes.load(Ordering::Acquire)
    }

    /// Whether the version probe should run: version unknown, or the last
    /// successful probe is older than ten minutes.
    pub fn need_build_info(&self) -> bool {
        if self.version.lock().expect("poisoned").is_unknown() {
            return true;
        }
        match *self.last_version_probe.lock().expect("poisoned") {
            None => true,
            Some(at) => at.elapsed() > VERSION_PROBE_INTERVAL,
        }
    }

    pub fn subscribe(&self) -> Receiver<ServerEvent> {
        let (tx, rx) = unbounded();
        self.listeners.lock().expect("poisoned").push(tx);
        rx
    }

    fn emit(&self, event: ServerEvent) {
        self.listeners
            .lock()
            .expect("poisoned")
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    // ── Connection lifecycle notifications ──────────────────────

    pub fn connection_opened(&self, address: &str) {
        *self.working_address.lock().expect("poisoned") = Some(address.to_string());
    }

    /// All addresses failed to connect.
    pub fn connect_failed(&self) {
        *self.working_address.lock().expect("poisoned") = None;
        self.set_role(Role::Unavailable);
    }

    /// A connection dropped abruptly.
    pub fn connection_terminated(&self) {
        *self.working_address.lock().expect("poisoned") = None;
        self.set_role(Role::Unavailable);
    }

    /// A status request failed; lag becomes effectively unbounded until
    /// the next successful probe.
    pub fn request_failed(&self) {
        self.set_lag(LAG_REQUEST_FAILED);
    }

    // ── Latency ─────────────────────────────────────────────────

    /// Folds one request latency sample into the moving average. The
    /// first sample replaces the unknown sentinel outright.
    pub fn update_latency(&self, nanos: u64) {
        let sample = nanos as f64 / NANOS_PER_MILLI;
        let old = self.average_latency_millis();
        if old == LATENCY_UNKNOWN {
            self.latency.store(sample.to_bits(), Ordering::Release);
            // A reachable server with no lag report is treated as caught
            // up until a probe says otherwise.
            if self.raw_lag() == LAG_UNKNOWN {
                self.set_lag(0.0);
            }
        } else {
            let next = DECAY_ALPHA * sample + (1.0 - DECAY_ALPHA) * old;
            self.latency.store(next.to_bits(), Ordering::Release);
        }
    }

    // ── Probe reply application ─────────────────────────────────

    /// Applies a status-probe reply (`ismaster`, optionally
    /// `replSetGetStatus` / `buildinfo`) field by field: role, lag, tags,
    /// canonical name, version, then the size caps.
    pub fn update(&self, reply: &Document) {
        self.update_role(reply);
        self.update_seconds_behind(reply);
        self.update_tags(reply);
        self.update_name(reply);
        self.update_version(reply);
        self.update_max_document_size(reply);
        self.update_max_batched_writes(reply);
    }

    fn update_role(&self, reply: &Document) {
        let Some(is_master) = reply.get_value("ismaster").and_then(Value::as_bool) else {
            return;
        };
        if is_master {
            self.set_role(Role::Writable);
            self.set_lag(0.0);
        } else if reply.get_value("secondary").and_then(Value::as_bool) == Some(true) {
            self.set_role(Role::ReadOnly);
            // Restricted deployments may refuse the replica-set status
            // call; a reachable secondary then counts as caught up.
            let lag = self.raw_lag();
            if lag == LAG_UNKNOWN || lag == LAG_REQUEST_FAILED {
                self.set_lag(0.0);
            }
        } else {
            self.set_role(Role::Unavailable);
        }
    }

    fn update_seconds_behind(&self, reply: &Document) {
        let Some(state) = reply.get_value("myState").and_then(Value::as_i32) else {
            return;
        };
        match state {
            1 => {
                self.set_role(Role::Writable);
                self.set_lag(0.0);
            }
            2 => {
                self.set_role(Role::ReadOnly);
                if let Some(own) = self.own_optime(reply) {
                    let latest = reply
                        .find(&[
                            PathMatcher::literal("members"),
                            PathMatcher::any(),
                            PathMatcher::literal("optimeDate"),
                        ])
                        .into_iter()
                        .filter_map(|value| match value {
                            Value::UtcDatetime(millis) => Some(*millis),
                            _ => None,
                        })
                        .max()
                        .unwrap_or(own);
                    self.set_lag((latest - own) as f64 / 1000.0);
                }
            }
            _ => {
                self.set_lag(LAG_UNKNOWN);
                self.set_role(Role::Unavailable);
            }
        }
    }

    /// This member's own optime, identified by canonical name.
    fn own_optime(&self, reply: &Document) -> Option<i64> {
        let name = self.canonical_name();
        let members = reply.get_value("members").and_then(Value::as_array)?;
        members.iter().find_map(|member| {
            let member = member.as_document()?;
            if member.get_value("name").and_then(Value::as_str) != Some(&name) {
                return None;
            }
            match member.get_value("optimeDate") {
                Some(Value::UtcDatetime(millis)) => Some(*millis),
                _ => None,
            }
        })
    }

    fn update_tags(&self, reply: &Document) {
        let Some(tags) = reply.get_value("tags").and_then(Value::as_document) else {
            return;
        };
        let new = if tags.is_empty() {
            None
        } else {
            Some(tags.clone())
        };
        let mut slot = self.tags.lock().expect("poisoned");
        if *slot != new {
            let old = slot.take();
            *slot = new.clone();
            drop(slot);
            self.emit(ServerEvent::Tags { old, new });
        }
    }

    fn update_name(&self, reply: &Document) {
        let Some(name) = reply.get_value("me").and_then(Value::as_str) else {
            return;
        };
        let mut slot = self.canonical_name.lock().expect("poisoned");
        if *slot != name {
            let old = std::mem::replace(&mut *slot, name.to_string());
            drop(slot);
            self.emit(ServerEvent::CanonicalName {
                old,
                new: name.to_string(),
            });
        }
    }

    fn update_version(&self, reply: &Document) {
        let parts: Vec<u32> = reply
            .find(&[PathMatcher::literal("versionArray"), PathMatcher::any()])
            .into_iter()
            .filter_map(Value::as_i64)
            .filter_map(|part| u32::try_from(part).ok())
            .collect();

        if !parts.is_empty() {
            self.set_version(Version::from_parts(parts), true);
        } else if let Some(text) = reply.get_value("version").and_then(Value::as_str) {
            self.set_version(Version::parse(text), true);
        } else if let Some(wire) = reply.get_value("maxWireVersion").and_then(Value::as_i32) {
            // The wire version is only a floor; never let it overwrite a
            // precisely known version, and keep probing for the real one.
            let floor = Version::for_wire_version(wire);
            let current = self.version();
            if current.is_unknown() || current < floor {
                self.set_version(floor, false);
            }
        }
    }

    fn set_version(&self, new: Version, precise: bool) {
        let mut slot = self.version.lock().expect("poisoned");
        if precise {
            *self.last_version_probe.lock().expect("poisoned") = Some(Instant::now());
        }
        if *slot != new {
            let old = std::mem::replace(&mut *slot, new.clone());
            drop(slot);
            self.emit(ServerEvent::Version { old, new });
        }
    }

    fn update_max_document_size(&self, reply: &Document) {
        let Some(max) = reply
            .get_value("maxBsonObjectSize")
            .and_then(Value::as_i64)
            .and_then(|v| usize::try_from(v).ok())
        else {
            return;
        };
        let old = self.max_document_size.swap(max, Ordering::AcqRel);
        if old != max {
            self.emit(ServerEvent::MaxDocumentSize { old, new: max });
        }
    }

    fn update_max_batched_writes(&self, reply: &Document) {
        let Some(max) = reply
            .get_value("maxWriteBatchSize")
            .and_then(Value::as_i64)
            .and_then(|v| usize::try_from(v).ok())
        else {
            return;
        };
        let old = self.max_batched_writes.swap(max, Ordering::AcqRel);
        if old != max {
            self.emit(ServerEvent::MaxBatchedWrites { old, new: max });
        }
    }

    // ── Internal setters with change events ─────────────────────

    fn set_role(&self, new: Role) {
        let old = Role::from_code(self.role.swap(new.code(), Ordering::AcqRel));
        if old != new {
            self.emit(ServerEvent::Role { old, new });
        }
    }

    fn raw_lag(&self) -> f64 {
        f64::from_bits(self.seconds_behind.load(Ordering::Acquire))
    }

    fn set_lag(&self, new: f64) {
        let old = f64::from_bits(
            self.seconds_behind.swap(new.to_bits(), Ordering::AcqRel),
        );
        if old != new {
            let wrap = |raw: f64| {
                if raw == LAG_UNKNOWN || raw == LAG_REQUEST_FAILED {
                    None
                } else {
                    Some(raw)
                }
            };
            self.emit(ServerEvent::Lag {
                old: wrap(old),
                new: wrap(new),
            });
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.canonical_name())
            .field("role", &self.role())
            .field("latency_ms", &self.average_latency_millis())
            .finish()
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({:?},{})",
            self.canonical_name(),
            self.role(),
            self.average_latency_millis()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_bson::doc;

    #[test]
    fn seeds_get_the_default_port() {
        let server = Server::new("db-1");
        assert_eq!(server.canonical_address(), "db-1:27017");
        assert_eq!(server.canonical_name(), "db-1:27017");
    }

    #[test]
    fn unknown_to_read_only_fires_one_role_event() {
        let server = Server::new("db-1:27017");
        let events = server.subscribe();

        server.update(&doc! { "ismaster": false, "secondary": true });

        assert_eq!(server.role(), Role::ReadOnly);
        let role_events: Vec<_> = events
            .try_iter()
            .filter(|e| matches!(e, ServerEvent::Role { .. }))
            .collect();
        assert_eq!(
            role_events,
            vec![ServerEvent::Role {
                old: Role::Unknown,
                new: Role::ReadOnly,
            }]
        );
        // Lag defaults to zero when the status call is unavailable.
        assert_eq!(server.seconds_behind(), Some(0.0));
    }

    #[test]
    fn ismaster_true_is_writable_with_zero_lag() {
        let server = Server::new("db-1:27017");
        server.update(&doc! { "ismaster": true });
        assert_eq!(server.role(), Role::Writable);
        assert_eq!(server.seconds_behind(), Some(0.0));
    }

    #[test]
    fn neither_master_nor_secondary_is_unavailable() {
        let server = Server::new("db-1:27017");
        server.update(&doc! { "ismaster": false, "secondary": false });
        assert_eq!(server.role(), Role::Unavailable);
    }

    #[test]
    fn replica_status_computes_lag_from_optimes() {
        let server = Server::new("db-1:27017");
        server.update(&doc! {
            "myState": 2i32,
            "members": vec![
                Value::from(doc! {
                    "name": "db-1:27017",
                    "optimeDate": Value::UtcDatetime(10_000),
                }),
                Value::from(doc! {
                    "name": "db-2:27017",
                    "optimeDate": Value::UtcDatetime(14_500),
                }),
            ],
        });
        assert_eq!(server.role(), Role::ReadOnly);
        assert_eq!(server.seconds_behind(), Some(4.5));
    }

    #[test]
    fn replica_status_other_state_is_unavailable_with_unknown_lag() {
        let server = Server::new("db-1:27017");
        server.update(&doc! { "myState": 3i32 });
        assert_eq!(server.role(), Role::Unavailable);
        assert_eq!(server.seconds_behind(), None);
    }

    #[test]
    fn latency_bootstrap_then_decay() {
        let server = Server::new("db-1:27017");
        assert_eq!(server.average_latency_millis(), f64::MAX);

        server.update_latency(10_000_000); // 10ms bootstraps
        assert_eq!(server.average_latency_millis(), 10.0);

        server.update_latency(20_000_000);
        let alpha = 2.0 / 1001.0;
        let expected = alpha * 20.0 + (1.0 - alpha) * 10.0;
        assert!((server.average_latency_millis() - expected).abs() < 1e-12);
    }

    #[test]
    fn latency_matches_recursive_definition_over_many_samples() {
        let server = Server::new("db-1:27017");
        let samples = [3.0f64, 8.0, 1.0, 12.5, 0.25, 100.0];
        let alpha = 2.0 / 1001.0;
        let mut expected = f64::MAX;
        for sample in samples {
            server.update_latency((sample * 1_000_000.0) as u64);
            expected = if expected == f64::MAX {
                sample
            } else {
                alpha * sample + (1.0 - alpha) * expected
            };
        }
        assert!((server.average_latency_millis() - expected).abs() < 1e-9);
    }

    #[test]
    fn canonical_name_follows_the_me_field() {
        let server = Server::new("seed-alias:27017");
        let events = server.subscribe();
        server.update(&doc! { "ismaster": true, "me": "db-1:27017" });
        assert_eq!(server.canonical_name(), "db-1:27017");
        assert!(events.try_iter().any(|e| matches!(
            e,
            ServerEvent::CanonicalName { .. }
        )));
    }

    #[test]
    fn size_caps_update_from_probe() {
        let server = Server::new("db-1:27017");
        assert_eq!(server.max_document_size(), 16 * 1024 * 1024);
        assert_eq!(server.max_batched_writes(), 1000);

        server.update(&doc! {
            "ismaster": true,
            "maxBsonObjectSize": 4_194_304i32,
            "maxWriteBatchSize": 500i32,
        });
        assert_eq!(server.max_document_size(), 4_194_304);
        assert_eq!(server.max_batched_writes(), 500);
    }

    #[test]
    fn version_prefers_precise_over_wire_floor() {
        let server = Server::new("db-1:27017");
        server.update(&doc! { "maxWireVersion": 2i32 });
        assert_eq!(server.version(), Version::parse("2.5.4"));
        // Floor alone leaves the probe cadence wanting more.
        assert!(server.need_build_info());

        server.update(&doc! {
            "versionArray": vec![2i32, 6i32, 3i32],
        });
        assert_eq!(server.version(), Version::parse("2.6.3"));
        assert!(!server.need_build_info());

        // A lower floor never overwrites the precise version.
        server.update(&doc! { "maxWireVersion": 1i32 });
        assert_eq!(server.version(), Version::parse("2.6.3"));
    }

    #[test]
    fn tags_empty_document_clears() {
        let server = Server::new("db-1:27017");
        server.update(&doc! { "tags": doc! { "dc": "east" } });
        assert_eq!(server.tags(), Some(doc! { "dc": "east" }));

        server.update(&doc! { "tags": doc! {} });
        assert_eq!(server.tags(), None);
    }

    #[test]
    fn terminated_connection_marks_unavailable() {
        let server = Server::new("db-1:27017");
        server.connection_opened("10.0.0.5:27017");
        assert_eq!(
            server.addresses(),
            vec!["10.0.0.5:27017".to_string(), "db-1:27017".to_string()]
        );

        server.connection_terminated();
        assert_eq!(server.role(), Role::Unavailable);
        assert_eq!(server.addresses(), vec!["db-1:27017".to_string()]);
    }
}
