//! Client for the basalt document database.
//!
//! Multiplexes requests from any number of caller threads across a pool
//! of long-lived server connections. Each connection owns a writer and a
//! reader thread; replies are correlated back to callers by request id
//! and delivered through typed callbacks on the reader thread.

mod auth;
mod batch;
pub mod callback;
mod cluster;
mod config;
mod connection;
mod durability;
mod error;
mod pool;
mod state;
mod version;

pub use auth::{Authenticator, NoAuth};
pub use batch::{BatchMode, BatchedWrite, BatchedWriteBuilder, Bundle, WriteKind, WriteOperation};
pub use cluster::{Cluster, ClusterKind, ReconnectStrategy};
pub use config::Config;
pub use connection::{Connection, ConnectionEvent, ConnectionFactory, ReplyCallback};
pub use durability::{Durability, DurabilityMode};
pub use error::Error;
pub use pool::Client;
pub use state::{Role, Server, ServerEvent};
pub use version::Version;

// The protocol types that appear in this crate's public API.
pub use basalt_proto::{ReadPreference, ReadPreferenceMode, Reply};
