use std::fmt;

use basalt_bson::EncodeError;

use crate::header::{Header, OpCode};
use crate::read_preference::ReadPreference;

/// A client-to-server message: knows its op code, its exact body size, how
/// to serialize itself, and which servers may answer it.
pub trait Message: fmt::Debug + Send {
    fn op_code(&self) -> OpCode;

    /// Exact encoded body size, excluding the 16-byte header.
    fn body_size(&self) -> usize;

    fn write_body(&self, out: &mut Vec<u8>) -> Result<(), EncodeError>;

    /// The read constraint for server selection. `None` means the message
    /// mutates state and must go to a writable server.
    fn read_preference(&self) -> Option<&ReadPreference> {
        None
    }

    /// Validates every embedded document against the server-reported cap,
    /// before any socket write.
    fn check_size(&self, max_document_size: usize) -> Result<(), EncodeError>;

    /// Frames the message: header (with the connection-assigned request id)
    /// followed by the body.
    fn encode(&self, request_id: i32) -> Result<Vec<u8>, EncodeError> {
        let total = Header::SIZE + self.body_size();
        let mut out = Vec::with_capacity(total);
        Header::new(total as i32, request_id, 0, self.op_code()).write(&mut out);
        self.write_body(&mut out)?;
        debug_assert_eq!(out.len(), total);
        Ok(out)
    }
}

/// Size of the `db.collection` namespace CString.
pub(crate) fn namespace_size(namespace: &str) -> usize {
    namespace.len() + 1
}

pub(crate) fn join_namespace(database: &str, collection: &str) -> String {
    format!("{database}.{collection}")
}
