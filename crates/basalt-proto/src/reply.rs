use basalt_bson::{Document, EncodeError, read_document, write_document};

use crate::error::WireError;
use crate::header::{Header, OpCode};

const CURSOR_NOT_FOUND: i32 = 1;
const QUERY_FAILURE: i32 = 2;
const SHARD_CONFIG_STALE: i32 = 4;
const AWAIT_CAPABLE: i32 = 8;

/// A server reply (op code 1).
///
/// ```text
/// int32     flags
/// int64     cursorId
/// int32     cursorOffset   index of the first returned document
/// int32     documentCount
/// document* documents
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub response_to: i32,
    pub cursor_id: i64,
    pub cursor_offset: i32,
    pub documents: Vec<Document>,
    pub cursor_not_found: bool,
    pub query_failed: bool,
    pub shard_config_stale: bool,
    pub await_capable: bool,
}

impl Reply {
    pub fn new(response_to: i32, documents: Vec<Document>) -> Self {
        Self {
            response_to,
            cursor_id: 0,
            cursor_offset: 0,
            documents,
            cursor_not_found: false,
            query_failed: false,
            shard_config_stale: false,
            await_capable: false,
        }
    }

    /// Decodes a reply body. The header supplies the response-to id and
    /// has already consumed its 16 bytes.
    pub fn read(header: &Header, body: &[u8]) -> Result<Self, WireError> {
        if body.len() != header.body_len() {
            return Err(WireError::Truncated);
        }
        if body.len() < 20 {
            return Err(WireError::Truncated);
        }
        let flags = i32::from_le_bytes([body[0], body[1], body[2], body[3]]);
        let cursor_id = i64::from_le_bytes([
            body[4], body[5], body[6], body[7], body[8], body[9], body[10], body[11],
        ]);
        let cursor_offset = i32::from_le_bytes([body[12], body[13], body[14], body[15]]);
        let document_count = i32::from_le_bytes([body[16], body[17], body[18], body[19]]);
        if document_count < 0 {
            return Err(WireError::BadFrameLength(document_count));
        }

        let mut documents = Vec::with_capacity(document_count as usize);
        let mut rest = &body[20..];
        for _ in 0..document_count {
            let (doc, after) = read_document(rest)?;
            documents.push(doc);
            rest = after;
        }
        if !rest.is_empty() {
            return Err(WireError::Truncated);
        }

        Ok(Self {
            response_to: header.response_to,
            cursor_id,
            cursor_offset,
            documents,
            cursor_not_found: flags & CURSOR_NOT_FOUND != 0,
            query_failed: flags & QUERY_FAILURE != 0,
            shard_config_stale: flags & SHARD_CONFIG_STALE != 0,
            await_capable: flags & AWAIT_CAPABLE != 0,
        })
    }

    /// Frames the reply as a server would send it. Used by the in-process
    /// test servers; the client itself only decodes replies.
    pub fn encode(&self, request_id: i32) -> Result<Vec<u8>, EncodeError> {
        let body_size =
            4 + 8 + 4 + 4 + self.documents.iter().map(Document::size).sum::<usize>();
        let mut out = Vec::with_capacity(Header::SIZE + body_size);
        Header::new(
            (Header::SIZE + body_size) as i32,
            request_id,
            self.response_to,
            OpCode::Reply,
        )
        .write(&mut out);

        let mut flags = 0;
        if self.cursor_not_found {
            flags |= CURSOR_NOT_FOUND;
        }
        if self.query_failed {
            flags |= QUERY_FAILURE;
        }
        if self.shard_config_stale {
            flags |= SHARD_CONFIG_STALE;
        }
        if self.await_capable {
            flags |= AWAIT_CAPABLE;
        }
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&self.cursor_id.to_le_bytes());
        out.extend_from_slice(&self.cursor_offset.to_le_bytes());
        out.extend_from_slice(&(self.documents.len() as i32).to_le_bytes());
        for doc in &self.documents {
            write_document(&mut out, doc)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_bson::doc;

    fn roundtrip(reply: Reply) -> Reply {
        let bytes = reply.encode(99).unwrap();
        let header_bytes: [u8; 16] = bytes[..16].try_into().unwrap();
        let header = Header::read(&header_bytes).unwrap();
        assert_eq!(header.op_code, OpCode::Reply);
        assert_eq!(header.request_id, 99);
        Reply::read(&header, &bytes[16..]).unwrap()
    }

    #[test]
    fn reply_roundtrips_documents_and_cursor() {
        let mut reply = Reply::new(42, vec![doc! { "ok": 1i32 }, doc! { "n": 2i32 }]);
        reply.cursor_id = 77;
        reply.cursor_offset = 10;
        let decoded = roundtrip(reply.clone());
        assert_eq!(decoded, reply);
    }

    #[test]
    fn flag_bits_roundtrip() {
        let mut reply = Reply::new(1, vec![]);
        reply.cursor_not_found = true;
        reply.await_capable = true;
        let decoded = roundtrip(reply.clone());
        assert!(decoded.cursor_not_found);
        assert!(decoded.await_capable);
        assert!(!decoded.query_failed);
        assert!(!decoded.shard_config_stale);
    }

    #[test]
    fn short_body_is_truncated() {
        let header = Header::new(16 + 10, 1, 2, OpCode::Reply);
        assert_eq!(
            Reply::read(&header, &[0u8; 10]).unwrap_err(),
            WireError::Truncated
        );
    }

    #[test]
    fn document_count_must_match_content() {
        let reply = Reply::new(5, vec![doc! { "a": 1i32 }]);
        let mut bytes = reply.encode(8).unwrap();
        // Claim two documents while carrying one.
        bytes[32..36].copy_from_slice(&2i32.to_le_bytes());
        let header_bytes: [u8; 16] = bytes[..16].try_into().unwrap();
        let header = Header::read(&header_bytes).unwrap();
        assert!(Reply::read(&header, &bytes[16..]).is_err());
    }
}
