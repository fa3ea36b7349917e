//! The known set of servers and the reconnect policy per cluster shape.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use basalt_bson::{Document, PathMatcher};
use tracing::{debug, info};

use crate::connection::{Connection, ConnectionFactory};
use crate::state::{Server, normalize_address};

/// The topology the client was pointed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterKind {
    Standalone,
    ReplicaSet,
    Sharded,
}

/// The servers we know about, deduplicated by canonical name.
///
/// Seeds create the initial entries; probe replies add discovered members
/// and collapse aliases once a server reports its own name.
pub struct Cluster {
    kind: ClusterKind,
    servers: Mutex<Vec<Arc<Server>>>,
}

impl Cluster {
    pub fn new(kind: ClusterKind) -> Self {
        Self {
            kind,
            servers: Mutex::new(Vec::new()),
        }
    }

    pub fn kind(&self) -> ClusterKind {
        self.kind
    }

    /// Adds a server by address, returning the existing record when one
    /// already answers to that canonical name.
    pub fn add(&self, address: &str) -> Arc<Server> {
        let name = normalize_address(address);
        let mut servers = self.servers.lock().expect("poisoned");
        if let Some(existing) = servers.iter().find(|s| s.canonical_name() == name) {
            return Arc::clone(existing);
        }
        let server = Arc::new(Server::new(&name));
        servers.push(Arc::clone(&server));
        server
    }

    pub fn servers(&self) -> Vec<Arc<Server>> {
        self.servers.lock().expect("poisoned").clone()
    }

    pub fn find(&self, canonical_name: &str) -> Option<Arc<Server>> {
        self.servers
            .lock()
            .expect("poisoned")
            .iter()
            .find(|s| s.canonical_name() == canonical_name)
            .cloned()
    }

    /// Folds the membership information out of a probe reply: `hosts`
    /// lists extra members, and a changed `me` may reveal that two seed
    /// entries are the same server.
    pub fn discover(&self, reply: &Document) {
        for host in reply.find(&[PathMatcher::literal("hosts"), PathMatcher::any()]) {
            if let Some(address) = host.as_str() {
                let known = self.find(&normalize_address(address)).is_some();
                if !known {
                    info!(server = address, "discovered cluster member");
                    self.add(address);
                }
            }
        }
        self.deduplicate();
    }

    /// Collapses entries that report the same canonical name, keeping the
    /// earliest. Runs after every probe application since names only
    /// settle once the server has described itself.
    pub fn deduplicate(&self) {
        let mut servers = self.servers.lock().expect("poisoned");
        let mut seen: Vec<String> = Vec::with_capacity(servers.len());
        servers.retain(|server| {
            let name = server.canonical_name();
            if seen.contains(&name) {
                debug!(server = %name, "collapsing duplicate cluster entry");
                false
            } else {
                seen.push(name);
                true
            }
        });
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("kind", &self.kind)
            .field("servers", &self.servers.lock().expect("poisoned").len())
            .finish()
    }
}

// ── Reconnect strategies ────────────────────────────────────

/// Policy for replacing a lost connection. Returns the replacement, or
/// `None` when the cluster is unreachable.
pub trait ReconnectStrategy: Send + Sync {
    fn reconnect(&self, lost: &Connection) -> Option<Connection>;
}

/// Builds the strategy appropriate for the cluster shape: a standalone
/// deployment can only retry its one server; replica sets and sharded
/// clusters fail over to any reachable member.
pub fn reconnect_strategy(
    kind: ClusterKind,
    cluster: Arc<Cluster>,
    factory: Arc<dyn ConnectionFactory>,
) -> Arc<dyn ReconnectStrategy> {
    match kind {
        ClusterKind::Standalone => Arc::new(SameServerReconnect {
            factory,
            attempts: 3,
            pause: Duration::from_millis(100),
        }),
        ClusterKind::ReplicaSet | ClusterKind::Sharded => {
            Arc::new(FailoverReconnect { cluster, factory })
        }
    }
}

/// Retries the lost connection's own server a few times with a short
/// pause, for topologies with nowhere else to go.
pub struct SameServerReconnect {
    factory: Arc<dyn ConnectionFactory>,
    attempts: usize,
    pause: Duration,
}

impl ReconnectStrategy for SameServerReconnect {
    fn reconnect(&self, lost: &Connection) -> Option<Connection> {
        for attempt in 0..self.attempts {
            if attempt > 0 {
                thread::sleep(self.pause);
            }
            match self.factory.connect_to(lost.server()) {
                Ok(connection) => return Some(connection),
                Err(e) => {
                    debug!(
                        server = %lost.server().canonical_name(),
                        attempt,
                        error = %e,
                        "reconnect attempt failed"
                    );
                }
            }
        }
        None
    }
}

/// Asks the factory for any eligible server, preferring the rest of the
/// cluster over the one that just failed.
pub struct FailoverReconnect {
    cluster: Arc<Cluster>,
    factory: Arc<dyn ConnectionFactory>,
}

impl ReconnectStrategy for FailoverReconnect {
    fn reconnect(&self, lost: &Connection) -> Option<Connection> {
        let lost_name = lost.server().canonical_name();
        for server in self.cluster.servers() {
            if server.canonical_name() == lost_name {
                continue;
            }
            if let Ok(connection) = self.factory.connect_to(&server) {
                return Some(connection);
            }
        }
        // Finally retry the failed server itself.
        self.factory.connect_to(lost.server()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_bson::doc;

    #[test]
    fn add_deduplicates_by_canonical_name() {
        let cluster = Cluster::new(ClusterKind::ReplicaSet);
        let a = cluster.add("db-1");
        let b = cluster.add("db-1:27017");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cluster.servers().len(), 1);
    }

    #[test]
    fn discover_adds_reported_hosts() {
        let cluster = Cluster::new(ClusterKind::ReplicaSet);
        cluster.add("db-1:27017");
        cluster.discover(&doc! {
            "ismaster": true,
            "hosts": vec!["db-1:27017", "db-2:27017", "db-3:27017"],
        });
        assert_eq!(cluster.servers().len(), 3);
        assert!(cluster.find("db-2:27017").is_some());
    }

    #[test]
    fn deduplicate_collapses_renamed_entries() {
        let cluster = Cluster::new(ClusterKind::ReplicaSet);
        let alias = cluster.add("alias:27017");
        cluster.add("db-1:27017");
        assert_eq!(cluster.servers().len(), 2);

        // The alias turns out to be db-1 once it reports its own name.
        alias.update(&doc! { "ismaster": true, "me": "db-1:27017" });
        cluster.deduplicate();
        assert_eq!(cluster.servers().len(), 1);
    }
}
