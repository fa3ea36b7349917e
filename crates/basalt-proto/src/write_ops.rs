//! Write messages: insert (2002), update (2001), delete (2006).

use basalt_bson::{Document, EncodeError, write_cstring, write_document};

use crate::header::OpCode;
use crate::message::{Message, join_namespace, namespace_size};

const CONTINUE_ON_ERROR: i32 = 1;
const UPSERT: i32 = 1;
const MULTI: i32 = 2;
const SINGLE_DELETE: i32 = 1;

/// Insert (op code 2002): int32 flags, namespace CString, then documents
/// back to back until the end of the frame.
#[derive(Debug, Clone)]
pub struct Insert {
    namespace: String,
    documents: Vec<Document>,
    continue_on_error: bool,
}

impl Insert {
    /// Documents without a top-level `_id` get one injected at the head
    /// here, so the caller observes the generated ids on the wire.
    pub fn new(
        database: &str,
        collection: &str,
        documents: Vec<Document>,
        continue_on_error: bool,
    ) -> Self {
        Self {
            namespace: join_namespace(database, collection),
            documents: documents.into_iter().map(Document::ensure_id).collect(),
            continue_on_error,
        }
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }
}

impl Message for Insert {
    fn op_code(&self) -> OpCode {
        OpCode::Insert
    }

    fn body_size(&self) -> usize {
        4 + namespace_size(&self.namespace)
            + self.documents.iter().map(Document::size).sum::<usize>()
    }

    fn write_body(&self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        let flags = if self.continue_on_error {
            CONTINUE_ON_ERROR
        } else {
            0
        };
        out.extend_from_slice(&flags.to_le_bytes());
        write_cstring(out, &self.namespace)?;
        for doc in &self.documents {
            write_document(out, doc)?;
        }
        Ok(())
    }

    fn check_size(&self, max_document_size: usize) -> Result<(), EncodeError> {
        for doc in &self.documents {
            doc.check_size(max_document_size)?;
        }
        Ok(())
    }
}

/// Update (op code 2001): int32 zero, namespace CString, int32 flags,
/// selector document, update document.
#[derive(Debug, Clone)]
pub struct Update {
    namespace: String,
    selector: Document,
    update: Document,
    upsert: bool,
    multi: bool,
}

impl Update {
    pub fn new(
        database: &str,
        collection: &str,
        selector: Document,
        update: Document,
        multi: bool,
        upsert: bool,
    ) -> Self {
        Self {
            namespace: join_namespace(database, collection),
            selector,
            update,
            upsert,
            multi,
        }
    }
}

impl Message for Update {
    fn op_code(&self) -> OpCode {
        OpCode::Update
    }

    fn body_size(&self) -> usize {
        4 + namespace_size(&self.namespace) + 4 + self.selector.size() + self.update.size()
    }

    fn write_body(&self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        out.extend_from_slice(&0i32.to_le_bytes());
        write_cstring(out, &self.namespace)?;
        let mut flags = 0;
        if self.upsert {
            flags |= UPSERT;
        }
        if self.multi {
            flags |= MULTI;
        }
        out.extend_from_slice(&flags.to_le_bytes());
        write_document(out, &self.selector)?;
        write_document(out, &self.update)
    }

    fn check_size(&self, max_document_size: usize) -> Result<(), EncodeError> {
        self.selector.check_size(max_document_size)?;
        self.update.check_size(max_document_size)
    }
}

/// Delete (op code 2006): int32 zero, namespace CString, int32 flags,
/// selector document.
#[derive(Debug, Clone)]
pub struct Delete {
    namespace: String,
    selector: Document,
    single: bool,
}

impl Delete {
    pub fn new(database: &str, collection: &str, selector: Document, single: bool) -> Self {
        Self {
            namespace: join_namespace(database, collection),
            selector,
            single,
        }
    }
}

impl Message for Delete {
    fn op_code(&self) -> OpCode {
        OpCode::Delete
    }

    fn body_size(&self) -> usize {
        4 + namespace_size(&self.namespace) + 4 + self.selector.size()
    }

    fn write_body(&self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        out.extend_from_slice(&0i32.to_le_bytes());
        write_cstring(out, &self.namespace)?;
        let flags = if self.single { SINGLE_DELETE } else { 0 };
        out.extend_from_slice(&flags.to_le_bytes());
        write_document(out, &self.selector)
    }

    fn check_size(&self, max_document_size: usize) -> Result<(), EncodeError> {
        self.selector.check_size(max_document_size)
    }
}
