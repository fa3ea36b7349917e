mod builder;
mod decode;
mod document;
mod element;
mod encode;
mod error;
mod oid;
mod value;

pub use builder::{ArrayBuilder, DocumentBuilder};
pub use decode::read_document;
pub use document::{Document, PathMatcher};
pub use element::Element;
pub use encode::{write_cstring, write_document};
pub use error::{DecodeError, EncodeError};
pub use oid::ObjectId;
pub use value::Value;
