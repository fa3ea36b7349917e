//! Cursor continuation messages: get-more (2005) and kill-cursors (2007).

use basalt_bson::{EncodeError, write_cstring};

use crate::header::OpCode;
use crate::message::{Message, join_namespace, namespace_size};
use crate::read_preference::ReadPreference;

/// GetMore (op code 2005): int32 zero, namespace CString, int32 batch
/// size, int64 cursor id.
///
/// Carries the read preference of the originating query so the pool can
/// route the pair to one connection.
#[derive(Debug, Clone)]
pub struct GetMore {
    namespace: String,
    cursor_id: i64,
    number_to_return: i32,
    read_preference: ReadPreference,
}

impl GetMore {
    pub fn new(
        database: &str,
        collection: &str,
        cursor_id: i64,
        number_to_return: i32,
        read_preference: ReadPreference,
    ) -> Self {
        Self {
            namespace: join_namespace(database, collection),
            cursor_id,
            number_to_return,
            read_preference,
        }
    }

    pub fn cursor_id(&self) -> i64 {
        self.cursor_id
    }
}

impl Message for GetMore {
    fn op_code(&self) -> OpCode {
        OpCode::GetMore
    }

    fn body_size(&self) -> usize {
        4 + namespace_size(&self.namespace) + 4 + 8
    }

    fn write_body(&self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        out.extend_from_slice(&0i32.to_le_bytes());
        write_cstring(out, &self.namespace)?;
        out.extend_from_slice(&self.number_to_return.to_le_bytes());
        out.extend_from_slice(&self.cursor_id.to_le_bytes());
        Ok(())
    }

    fn read_preference(&self) -> Option<&ReadPreference> {
        Some(&self.read_preference)
    }

    fn check_size(&self, _max_document_size: usize) -> Result<(), EncodeError> {
        Ok(())
    }
}

/// KillCursors (op code 2007): int32 zero, int32 count, then that many
/// int64 cursor ids.
#[derive(Debug, Clone)]
pub struct KillCursors {
    cursor_ids: Vec<i64>,
}

impl KillCursors {
    pub fn new(cursor_ids: Vec<i64>) -> Self {
        Self { cursor_ids }
    }
}

impl Message for KillCursors {
    fn op_code(&self) -> OpCode {
        OpCode::KillCursors
    }

    fn body_size(&self) -> usize {
        4 + 4 + 8 * self.cursor_ids.len()
    }

    fn write_body(&self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        out.extend_from_slice(&0i32.to_le_bytes());
        out.extend_from_slice(&(self.cursor_ids.len() as i32).to_le_bytes());
        for id in &self.cursor_ids {
            out.extend_from_slice(&id.to_le_bytes());
        }
        Ok(())
    }

    fn check_size(&self, _max_document_size: usize) -> Result<(), EncodeError> {
        Ok(())
    }
}
