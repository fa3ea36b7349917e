//! The batched-write planner: packs insert/update/delete operations into
//! server-side write commands under the per-server byte and count caps.

use basalt_bson::{ArrayBuilder, Document, DocumentBuilder, Value};

use crate::durability::Durability;
use crate::error::Error;

/// One write to be carried by a batched command.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOperation {
    Insert {
        document: Document,
    },
    Update {
        query: Document,
        update: Document,
        multi: bool,
        upsert: bool,
    },
    Delete {
        query: Document,
        single: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Update,
    Delete,
}

impl WriteKind {
    fn command_name(self) -> &'static str {
        match self {
            WriteKind::Insert => "insert",
            WriteKind::Update => "update",
            WriteKind::Delete => "delete",
        }
    }

    fn array_name(self) -> &'static str {
        match self {
            WriteKind::Insert => "documents",
            WriteKind::Update => "updates",
            WriteKind::Delete => "deletes",
        }
    }
}

/// Fixed accounting overhead of an update entry beyond its two documents:
/// entry-document framing plus the `q`, `u`, `upsert` and `multi` fields.
const UPDATE_OVERHEAD: usize = 29;
/// Same for a delete entry: framing plus `q` and `limit`.
const DELETE_OVERHEAD: usize = 20;

impl WriteOperation {
    /// Documents without an `_id` get one injected at the head, before
    /// any size accounting looks at them.
    pub fn insert(document: Document) -> Self {
        WriteOperation::Insert {
            document: document.ensure_id(),
        }
    }

    pub fn update(query: Document, update: Document, multi: bool, upsert: bool) -> Self {
        WriteOperation::Update {
            query,
            update,
            multi,
            upsert,
        }
    }

    pub fn delete(query: Document, single: bool) -> Self {
        WriteOperation::Delete { query, single }
    }

    pub fn kind(&self) -> WriteKind {
        match self {
            WriteOperation::Insert { .. } => WriteKind::Insert,
            WriteOperation::Update { .. } => WriteKind::Update,
            WriteOperation::Delete { .. } => WriteKind::Delete,
        }
    }

    /// Accounted byte size of the entry, excluding its array index.
    pub fn size(&self) -> usize {
        match self {
            WriteOperation::Insert { document } => document.size(),
            WriteOperation::Update { query, update, .. } => {
                query.size() + update.size() + UPDATE_OVERHEAD
            }
            WriteOperation::Delete { query, .. } => query.size() + DELETE_OVERHEAD,
        }
    }

    /// The array entry sent to the server.
    fn to_entry(&self) -> Value {
        match self {
            WriteOperation::Insert { document } => Value::Document(document.clone()),
            WriteOperation::Update {
                query,
                update,
                multi,
                upsert,
            } => {
                let mut entry = DocumentBuilder::new()
                    .add("q", query.clone())
                    .add("u", update.clone());
                if *upsert {
                    entry = entry.add("upsert", true);
                }
                if *multi {
                    entry = entry.add("multi", true);
                }
                Value::Document(entry.build())
            }
            WriteOperation::Delete { query, single } => Value::Document(
                DocumentBuilder::new()
                    .add("q", query.clone())
                    .add("limit", if *single { 1i32 } else { 0i32 })
                    .build(),
            ),
        }
    }

    /// The document blamed in a *document-too-large* failure.
    fn largest_document(&self) -> Document {
        match self {
            WriteOperation::Insert { document } => document.clone(),
            WriteOperation::Update { query, update, .. } => {
                if update.size() > query.size() {
                    update.clone()
                } else {
                    query.clone()
                }
            }
            WriteOperation::Delete { query, .. } => query.clone(),
        }
    }
}

/// Cost of the array index name for the `n`-th entry: digits + NUL +
/// type tag.
fn index_overhead(index: usize) -> usize {
    if index < 10 {
        3
    } else if index < 100 {
        4
    } else if index < 1000 {
        5
    } else if index < 10000 {
        6
    } else {
        index.to_string().len() + 2
    }
}

/// How the planner may arrange operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
    /// Submission order, as many writes applied as possible.
    #[default]
    SerializeAndContinue,
    /// Submission order, server stops at the first failure.
    SerializeAndStop,
    /// Free reordering for the fewest commands; all writes attempted.
    Reordered,
}

/// One command document plus the operations it carries, in the order the
/// planner chose.
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    command: Document,
    writes: Vec<WriteOperation>,
}

impl Bundle {
    pub fn command(&self) -> &Document {
        &self.command
    }

    pub fn writes(&self) -> &[WriteOperation] {
        &self.writes
    }
}

/// A group of writes to submit as one logical batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchedWrite {
    writes: Vec<WriteOperation>,
    mode: BatchMode,
    durability: Durability,
}

impl BatchedWrite {
    pub fn builder() -> BatchedWriteBuilder {
        BatchedWriteBuilder::default()
    }

    pub fn writes(&self) -> &[WriteOperation] {
        &self.writes
    }

    pub fn mode(&self) -> BatchMode {
        self.mode
    }

    pub fn durability(&self) -> Durability {
        self.durability
    }

    /// Packs the writes into command bundles for `collection`, under the
    /// server's byte cap and per-command operation cap.
    pub fn to_bundles(
        &self,
        collection: &str,
        max_command_size: usize,
        max_ops_per_bundle: usize,
    ) -> Result<Vec<Bundle>, Error> {
        match self.mode {
            BatchMode::Reordered => self.reordered(collection, max_command_size, max_ops_per_bundle),
            BatchMode::SerializeAndContinue => {
                self.serialized(collection, max_command_size, max_ops_per_bundle, false)
            }
            BatchMode::SerializeAndStop => {
                self.serialized(collection, max_command_size, max_ops_per_bundle, true)
            }
        }
    }

    /// Walks operations in submission order, closing the current bundle
    /// on a type change, a byte overflow, or the operation cap.
    fn serialized(
        &self,
        collection: &str,
        max_command_size: usize,
        max_ops_per_bundle: usize,
        stop_on_error: bool,
    ) -> Result<Vec<Bundle>, Error> {
        let mut bundles = Vec::new();
        let mut current: Vec<WriteOperation> = Vec::new();
        let mut current_kind = WriteKind::Insert;
        let mut remaining = 0usize;

        for op in &self.writes {
            let base = op.size();
            if base > max_command_size {
                return Err(too_large(op, base, max_command_size));
            }

            if !current.is_empty() {
                let entry = base + index_overhead(current.len());
                if current_kind != op.kind()
                    || entry > remaining
                    || current.len() >= max_ops_per_bundle
                {
                    bundles.push(self.bundle(
                        collection,
                        current_kind,
                        std::mem::take(&mut current),
                        stop_on_error,
                    ));
                }
            }

            if current.is_empty() {
                current_kind = op.kind();
                let base_size = self.command_base_size(collection, current_kind, stop_on_error);
                remaining = max_command_size.saturating_sub(base_size);
            }

            let entry = base + index_overhead(current.len());
            remaining = remaining.saturating_sub(entry);
            current.push(op.clone());
        }

        if !current.is_empty() {
            bundles.push(self.bundle(collection, current_kind, current, stop_on_error));
        }
        Ok(bundles)
    }

    /// Buckets by type, sorts each bucket by size descending, then
    /// greedily packs the largest operation that still fits. Buckets are
    /// emitted in insert, update, delete order so same-kind commands stay
    /// contiguous.
    fn reordered(
        &self,
        collection: &str,
        max_command_size: usize,
        max_ops_per_bundle: usize,
    ) -> Result<Vec<Bundle>, Error> {
        let mut buckets: [Vec<WriteOperation>; 3] = [Vec::new(), Vec::new(), Vec::new()];
        for op in &self.writes {
            let at = match op.kind() {
                WriteKind::Insert => 0,
                WriteKind::Update => 1,
                WriteKind::Delete => 2,
            };
            buckets[at].push(op.clone());
        }

        let mut bundles = Vec::new();
        for (at, kind) in [WriteKind::Insert, WriteKind::Update, WriteKind::Delete]
            .into_iter()
            .enumerate()
        {
            let bucket = &mut buckets[at];
            if bucket.is_empty() {
                continue;
            }
            bucket.sort_by(|a, b| b.size().cmp(&a.size()));

            // The biggest operation of the bucket fails first.
            let biggest = bucket[0].size();
            if biggest > max_command_size {
                return Err(too_large(&bucket[0], biggest, max_command_size));
            }

            let base_size = self.command_base_size(collection, kind, false);
            while !bucket.is_empty() {
                let mut remaining = max_command_size.saturating_sub(base_size);
                let mut current: Vec<WriteOperation> = Vec::new();

                while current.len() < max_ops_per_bundle {
                    let fits = bucket
                        .iter()
                        .position(|op| op.size() + index_overhead(current.len()) <= remaining);
                    let Some(found) = fits else { break };
                    let op = bucket.remove(found);
                    remaining -= op.size() + index_overhead(current.len());
                    current.push(op);
                }

                if current.is_empty() {
                    // Nothing fits under the command overhead; the
                    // largest remaining operation travels alone.
                    current.push(bucket.remove(0));
                }
                bundles.push(self.bundle(collection, kind, current, false));
            }
        }
        Ok(bundles)
    }

    /// Builds the command document for one finished bundle.
    fn bundle(
        &self,
        collection: &str,
        kind: WriteKind,
        writes: Vec<WriteOperation>,
        stop_on_error: bool,
    ) -> Bundle {
        let mut command = DocumentBuilder::new();
        command.push(kind.command_name(), collection);
        // `ordered` defaults to true server-side; only the false case is
        // spelled out.
        if !stop_on_error {
            command.push("ordered", false);
        }
        command.push("writeConcern", self.durability.write_concern());

        let mut array = ArrayBuilder::new();
        for op in &writes {
            array.push(op.to_entry());
        }
        command.push(kind.array_name(), array.build());

        Bundle {
            command: command.build(),
            writes,
        }
    }

    /// Size of the command document before any operation is added.
    fn command_base_size(&self, collection: &str, kind: WriteKind, stop_on_error: bool) -> usize {
        self.bundle(collection, kind, Vec::new(), stop_on_error)
            .command
            .size()
    }
}

fn too_large(op: &WriteOperation, size: usize, max: usize) -> Error {
    Error::DocumentTooLarge {
        size,
        max,
        document: Some(op.largest_document()),
    }
}

/// Accumulates writes for a [`BatchedWrite`].
#[derive(Debug, Default)]
pub struct BatchedWriteBuilder {
    writes: Vec<WriteOperation>,
    mode: BatchMode,
    durability: Option<Durability>,
}

impl BatchedWriteBuilder {
    pub fn insert(mut self, document: Document) -> Self {
        self.writes.push(WriteOperation::insert(document));
        self
    }

    pub fn update(mut self, query: Document, update: Document, multi: bool, upsert: bool) -> Self {
        self.writes
            .push(WriteOperation::update(query, update, multi, upsert));
        self
    }

    pub fn delete(mut self, query: Document, single: bool) -> Self {
        self.writes.push(WriteOperation::delete(query, single));
        self
    }

    pub fn write(mut self, op: WriteOperation) -> Self {
        self.writes.push(op);
        self
    }

    pub fn mode(mut self, mode: BatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn durability(mut self, durability: Durability) -> Self {
        self.durability = Some(durability);
        self
    }

    pub fn build(self) -> BatchedWrite {
        BatchedWrite {
            writes: self.writes,
            mode: self.mode,
            durability: self.durability.unwrap_or_default(),
        }
    }
}
