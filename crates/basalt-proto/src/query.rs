use basalt_bson::{Document, EncodeError, write_cstring, write_document};

use crate::header::OpCode;
use crate::message::{Message, join_namespace, namespace_size};
use crate::read_preference::ReadPreference;

// Query flag bits.
const TAILABLE: i32 = 2;
const SLAVE_OK: i32 = 4;
const OPLOG_REPLAY: i32 = 8;
const NO_CURSOR_TIMEOUT: i32 = 16;
const AWAIT_DATA: i32 = 32;
const EXHAUST: i32 = 64;
const PARTIAL: i32 = 128;

/// A query request (op code 2004).
///
/// ```text
/// int32    flags
/// cstring  db.collection
/// int32    numberToSkip
/// int32    numberToReturn   negative = hard limit
/// document query
/// document fieldsToReturn   optional
/// ```
///
/// The generic command form is a query against the `$cmd` pseudo-collection
/// with `numberToReturn = -1`; see [`Query::command`].
#[derive(Debug, Clone)]
pub struct Query {
    namespace: String,
    query: Document,
    fields: Option<Document>,
    skip: i32,
    number_to_return: i32,
    read_preference: ReadPreference,
    tailable: bool,
    oplog_replay: bool,
    no_cursor_timeout: bool,
    await_data: bool,
    exhaust: bool,
    partial: bool,
}

impl Query {
    pub fn new(
        database: &str,
        collection: &str,
        query: Document,
        read_preference: ReadPreference,
    ) -> Self {
        Self {
            namespace: join_namespace(database, collection),
            query,
            fields: None,
            skip: 0,
            number_to_return: 0,
            read_preference,
            tailable: false,
            oplog_replay: false,
            no_cursor_timeout: false,
            await_data: false,
            exhaust: false,
            partial: false,
        }
    }

    /// A generic command framed as a query over `<db>.$cmd` with
    /// `numberToReturn = -1`.
    pub fn command(database: &str, command: Document, read_preference: ReadPreference) -> Self {
        let mut query = Self::new(database, "$cmd", command, read_preference);
        query.number_to_return = -1;
        query
    }

    pub fn with_fields(mut self, fields: Document) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn with_skip(mut self, skip: i32) -> Self {
        self.skip = skip;
        self
    }

    /// Negative values are a hard limit on the result count.
    pub fn with_number_to_return(mut self, number_to_return: i32) -> Self {
        self.number_to_return = number_to_return;
        self
    }

    pub fn tailable(mut self) -> Self {
        self.tailable = true;
        self
    }

    pub fn oplog_replay(mut self) -> Self {
        self.oplog_replay = true;
        self
    }

    pub fn no_cursor_timeout(mut self) -> Self {
        self.no_cursor_timeout = true;
        self
    }

    pub fn await_data(mut self) -> Self {
        self.await_data = true;
        self
    }

    pub fn exhaust(mut self) -> Self {
        self.exhaust = true;
        self
    }

    pub fn partial(mut self) -> Self {
        self.partial = true;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn query(&self) -> &Document {
        &self.query
    }

    fn flags(&self) -> i32 {
        let mut flags = 0;
        if self.tailable {
            flags |= TAILABLE;
        }
        if self.read_preference.is_secondary_ok() {
            flags |= SLAVE_OK;
        }
        if self.oplog_replay {
            flags |= OPLOG_REPLAY;
        }
        if self.no_cursor_timeout {
            flags |= NO_CURSOR_TIMEOUT;
        }
        if self.await_data {
            flags |= AWAIT_DATA;
        }
        if self.exhaust {
            flags |= EXHAUST;
        }
        if self.partial {
            flags |= PARTIAL;
        }
        flags
    }
}

impl Message for Query {
    fn op_code(&self) -> OpCode {
        OpCode::Query
    }

    fn body_size(&self) -> usize {
        4 + namespace_size(&self.namespace)
            + 4
            + 4
            + self.query.size()
            + self.fields.as_ref().map_or(0, Document::size)
    }

    fn write_body(&self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        out.extend_from_slice(&self.flags().to_le_bytes());
        write_cstring(out, &self.namespace)?;
        out.extend_from_slice(&self.skip.to_le_bytes());
        out.extend_from_slice(&self.number_to_return.to_le_bytes());
        write_document(out, &self.query)?;
        if let Some(fields) = &self.fields {
            write_document(out, fields)?;
        }
        Ok(())
    }

    fn read_preference(&self) -> Option<&ReadPreference> {
        Some(&self.read_preference)
    }

    fn check_size(&self, max_document_size: usize) -> Result<(), EncodeError> {
        self.query.check_size(max_document_size)?;
        if let Some(fields) = &self.fields {
            fields.check_size(max_document_size)?;
        }
        Ok(())
    }
}
