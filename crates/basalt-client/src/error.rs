use std::fmt;
use std::io;

use basalt_bson::{Document, EncodeError};
use basalt_proto::WireError;

/// Every failure a caller can observe through the client.
#[derive(Debug)]
pub enum Error {
    /// The socket closed while a request was in flight; its reply will
    /// never arrive and the server-side outcome is unknown.
    ConnectionLost(String),
    /// The pick ladder was exhausted: no eligible server could be reached.
    CannotConnect(String),
    /// A reply had the wrong cardinality or was missing a required field.
    ReplyShape(String),
    /// The server reported a failure (`ok: 0` or the query-failure flag).
    Server { code: Option<i32>, message: String },
    /// A document exceeded the server-reported size cap. Detected locally,
    /// before any bytes are written.
    DocumentTooLarge {
        size: usize,
        max: usize,
        document: Option<Document>,
    },
    /// An element name could not be represented on the wire.
    InvalidName(String),
    /// Framing or UTF-8 was invalid on the wire; fatal to the connection.
    Decode(String),
    /// The server signaled the cursor has been closed.
    CursorNotFound(String),
    /// The server signaled a stale routing table.
    ShardConfigStale(String),
    /// The pluggable authenticator rejected the connection.
    AuthFailed(String),
    /// `close()` was called while the callback was still pending.
    Interrupted,
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "connection lost: {msg}"),
            Self::CannotConnect(msg) => write!(f, "cannot connect: {msg}"),
            Self::ReplyShape(msg) => write!(f, "unexpected reply shape: {msg}"),
            Self::Server { code: Some(code), message } => {
                write!(f, "server error {code}: {message}")
            }
            Self::Server { code: None, message } => write!(f, "server error: {message}"),
            Self::DocumentTooLarge { size, max, document } => {
                write!(f, "document too large: {size} bytes, server maximum {max}")?;
                if let Some(doc) = document {
                    write!(f, " ({doc})")?;
                }
                Ok(())
            }
            Self::InvalidName(name) => write!(f, "invalid name: {name:?}"),
            Self::Decode(msg) => write!(f, "decode failure: {msg}"),
            Self::CursorNotFound(msg) => write!(f, "cursor not found: {msg}"),
            Self::ShardConfigStale(msg) => write!(f, "shard configuration stale: {msg}"),
            Self::AuthFailed(msg) => write!(f, "authentication failed: {msg}"),
            Self::Interrupted => write!(f, "interrupted by close"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EncodeError> for Error {
    fn from(e: EncodeError) -> Self {
        match e {
            EncodeError::TooLarge { size, max } => Self::DocumentTooLarge {
                size,
                max,
                document: None,
            },
            EncodeError::InvalidName(name) => Self::InvalidName(name),
        }
    }
}

impl From<WireError> for Error {
    fn from(e: WireError) -> Self {
        Self::Decode(e.to_string())
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
