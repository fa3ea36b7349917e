use std::time::Duration;

use basalt_proto::ReadPreference;

use crate::cluster::ClusterKind;
use crate::durability::Durability;

/// Client configuration.
///
/// Plain data with a [`Default`]; construct with struct-update syntax:
///
/// ```
/// use basalt_client::Config;
///
/// let config = Config {
///     seeds: vec!["db-1:27017".into(), "db-2:27017".into()],
///     max_connections: 5,
///     ..Config::default()
/// };
/// # assert_eq!(config.connection_scan, 5);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Initial `host:port` list; discovery may add more servers.
    pub seeds: Vec<String>,
    /// Upper bound on pooled connections. Clamped to at least 1.
    pub max_connections: usize,
    /// How many connections the pick ladder samples per pass.
    pub connection_scan: usize,
    /// How long `send` may wait for an in-flight reconnect before failing
    /// with cannot-connect. Zero waits forever.
    pub reconnect_timeout: Duration,
    /// Per-connection drain allowance during `close`.
    pub read_timeout: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Cadence of the status probe driving server-state updates.
    pub probe_interval: Duration,
    pub cluster_kind: ClusterKind,
    pub default_durability: Durability,
    pub default_read_preference: ReadPreference,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            max_connections: 3,
            connection_scan: 5,
            reconnect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            probe_interval: Duration::from_secs(30),
            cluster_kind: ClusterKind::Standalone,
            default_durability: Durability::ACK,
            default_read_preference: ReadPreference::primary(),
        }
    }
}

impl Config {
    /// The clamp applied everywhere the pool reads the cap.
    pub fn connection_limit(&self) -> usize {
        self.max_connections.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_clamps_to_one() {
        let config = Config {
            max_connections: 0,
            ..Config::default()
        };
        assert_eq!(config.connection_limit(), 1);
    }
}
