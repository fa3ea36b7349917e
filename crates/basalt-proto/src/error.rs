use std::fmt;

use basalt_bson::DecodeError;

/// Failure while decoding a frame off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The header carried an op code outside the protocol.
    UnknownOpCode(i32),
    /// The header length field is impossible.
    BadFrameLength(i32),
    /// The body ended before the advertised content.
    Truncated,
    /// An embedded document failed to decode.
    Bson(DecodeError),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOpCode(code) => write!(f, "unknown op code: {code}"),
            Self::BadFrameLength(len) => write!(f, "bad frame length: {len}"),
            Self::Truncated => write!(f, "truncated frame"),
            Self::Bson(e) => write!(f, "document decode failed: {e}"),
        }
    }
}

impl std::error::Error for WireError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bson(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DecodeError> for WireError {
    fn from(e: DecodeError) -> Self {
        Self::Bson(e)
    }
}
