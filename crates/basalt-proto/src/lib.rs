mod cursor_ops;
mod error;
mod header;
mod message;
pub mod probe;
mod query;
mod read_preference;
mod reply;
mod write_ops;

pub use cursor_ops::{GetMore, KillCursors};
pub use error::WireError;
pub use header::{Header, OpCode};
pub use message::Message;
pub use query::Query;
pub use read_preference::{ReadPreference, ReadPreferenceMode};
pub use reply::Reply;
pub use write_ops::{Delete, Insert, Update};
