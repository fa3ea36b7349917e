use std::fmt;

/// Failure while encoding a document to bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Element names and regex fields go on the wire as NUL-terminated
    /// strings; an interior NUL cannot be represented.
    InvalidName(String),
    /// The serialized document would exceed the server-reported cap.
    TooLarge { size: usize, max: usize },
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName(name) => {
                write!(f, "invalid name (interior NUL): {name:?}")
            }
            Self::TooLarge { size, max } => {
                write!(f, "document too large: {size} bytes, server maximum {max}")
            }
        }
    }
}

impl std::error::Error for EncodeError {}

/// Failure while decoding bytes into a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Ran out of bytes mid-value.
    Truncated,
    /// A length prefix is negative or overruns the input.
    BadLength(i32),
    /// A string or name is not valid UTF-8.
    InvalidUtf8,
    /// An element carried a type tag outside the closed set.
    UnknownType(u8),
    /// A document did not end with its terminating NUL.
    MissingTerminator,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated input"),
            Self::BadLength(len) => write!(f, "bad length prefix: {len}"),
            Self::InvalidUtf8 => write!(f, "invalid UTF-8"),
            Self::UnknownType(tag) => write!(f, "unknown element type tag: 0x{tag:02x}"),
            Self::MissingTerminator => write!(f, "document missing terminating NUL"),
        }
    }
}

impl std::error::Error for DecodeError {}
