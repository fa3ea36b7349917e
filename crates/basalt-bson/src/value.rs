use std::cmp::Ordering;

use crate::document::Document;
use crate::oid::ObjectId;

/// A typed value inside a document.
///
/// The type set is closed: every variant maps to exactly one wire type tag
/// and the codec dispatches on that tag. Sizes are exact encoded byte
/// counts, computed without serializing.
#[derive(Debug, Clone)]
pub enum Value {
    /// IEEE-754 binary64, little-endian on the wire.
    Double(f64),
    /// Length-prefixed UTF-8 with a trailing NUL.
    String(String),
    /// A nested document.
    Document(Document),
    /// Encoded as a document whose element names are "0", "1", "2", ...
    Array(Vec<Value>),
    /// Opaque bytes with a subtype tag.
    Binary { subtype: u8, bytes: Vec<u8> },
    /// Deprecated on the wire, still decoded.
    Undefined,
    ObjectId(ObjectId),
    Boolean(bool),
    /// Milliseconds since the UNIX epoch.
    UtcDatetime(i64),
    Null,
    Regex { pattern: String, options: String },
    /// Deprecated namespace + id pair, still decoded.
    DbPointer { namespace: String, id: ObjectId },
    JavaScript(String),
    Symbol(String),
    JavaScriptWithScope { code: String, scope: Document },
    Int32(i32),
    /// Replication timestamp: increment + seconds, two u32s on the wire.
    Timestamp { increment: u32, time: u32 },
    Int64(i64),
    MinKey,
    MaxKey,
}

impl Value {
    /// The wire type tag for this value.
    pub fn type_tag(&self) -> u8 {
        match self {
            Value::Double(_) => 0x01,
            Value::String(_) => 0x02,
            Value::Document(_) => 0x03,
            Value::Array(_) => 0x04,
            Value::Binary { .. } => 0x05,
            Value::Undefined => 0x06,
            Value::ObjectId(_) => 0x07,
            Value::Boolean(_) => 0x08,
            Value::UtcDatetime(_) => 0x09,
            Value::Null => 0x0A,
            Value::Regex { .. } => 0x0B,
            Value::DbPointer { .. } => 0x0C,
            Value::JavaScript(_) => 0x0D,
            Value::Symbol(_) => 0x0E,
            Value::JavaScriptWithScope { .. } => 0x0F,
            Value::Int32(_) => 0x10,
            Value::Timestamp { .. } => 0x11,
            Value::Int64(_) => 0x12,
            Value::MinKey => 0xFF,
            Value::MaxKey => 0x7F,
        }
    }

    /// Exact number of bytes the value payload occupies on the wire,
    /// excluding the element's type tag and name.
    pub fn size(&self) -> usize {
        match self {
            Value::Double(_) => 8,
            Value::String(s) => 4 + s.len() + 1,
            Value::Document(d) => d.size(),
            Value::Array(values) => array_size(values),
            Value::Binary { bytes, .. } => 4 + 1 + bytes.len(),
            Value::Undefined => 0,
            Value::ObjectId(_) => 12,
            Value::Boolean(_) => 1,
            Value::UtcDatetime(_) => 8,
            Value::Null => 0,
            Value::Regex { pattern, options } => pattern.len() + 1 + options.len() + 1,
            Value::DbPointer { namespace, .. } => 4 + namespace.len() + 1 + 12,
            Value::JavaScript(code) => 4 + code.len() + 1,
            Value::Symbol(s) => 4 + s.len() + 1,
            Value::JavaScriptWithScope { code, scope } => {
                4 + (4 + code.len() + 1) + scope.size()
            }
            Value::Int32(_) => 4,
            Value::Timestamp { .. } => 8,
            Value::Int64(_) => 8,
            Value::MinKey => 0,
            Value::MaxKey => 0,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int32(_) | Value::Int64(_) | Value::Double(_))
    }

    /// Numeric widening across int32/int64/double. `None` for every
    /// non-numeric variant.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Int32(v) => Some(f64::from(*v)),
            Value::Int64(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int32(v) => Some(*v),
            Value::Int64(v) => i32::try_from(*v).ok(),
            Value::Double(v) => Some(*v as i32),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            Value::Double(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// String or symbol payload.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }
}

/// Size of an array payload: a document whose names are the stringified
/// indices 0, 1, 2, ...
fn array_size(values: &[Value]) -> usize {
    let mut total = 4 + 1;
    for (index, value) in values.iter().enumerate() {
        total += 1 + decimal_width(index) + 1 + value.size();
    }
    total
}

/// Number of decimal digits in `index`, i.e. the UTF-8 length of the
/// element name an array entry gets.
pub(crate) fn decimal_width(index: usize) -> usize {
    if index < 10 {
        1
    } else if index < 100 {
        2
    } else if index < 1000 {
        3
    } else if index < 10000 {
        4
    } else {
        index.to_string().len()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    /// Cross-numeric promotion: int32/int64/double compare as doubles,
    /// string/symbol compare as strings. Everything else compares by type
    /// tag, then structurally within the same type.
    fn cmp(&self, other: &Self) -> Ordering {
        if self.is_numeric() && other.is_numeric() {
            // as_f64 cannot fail for numeric variants.
            let a = self.as_f64().unwrap_or(f64::NAN);
            let b = other.as_f64().unwrap_or(f64::NAN);
            return a.total_cmp(&b);
        }
        if let (Some(a), Some(b)) = (self.as_str(), other.as_str()) {
            return a.cmp(b);
        }

        match self.type_tag().cmp(&other.type_tag()) {
            Ordering::Equal => self.cmp_same_type(other),
            unequal => unequal,
        }
    }
}

impl Value {
    fn cmp_same_type(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Document(a), Value::Document(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => a.cmp(b),
            (
                Value::Binary { subtype: at, bytes: ab },
                Value::Binary { subtype: bt, bytes: bb },
            ) => at.cmp(bt).then_with(|| ab.cmp(bb)),
            (Value::ObjectId(a), Value::ObjectId(b)) => a.bytes().cmp(b.bytes()),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::UtcDatetime(a), Value::UtcDatetime(b)) => a.cmp(b),
            (
                Value::Regex { pattern: ap, options: ao },
                Value::Regex { pattern: bp, options: bo },
            ) => ap.cmp(bp).then_with(|| ao.cmp(bo)),
            (
                Value::DbPointer { namespace: an, id: ai },
                Value::DbPointer { namespace: bn, id: bi },
            ) => an.cmp(bn).then_with(|| ai.bytes().cmp(bi.bytes())),
            (Value::JavaScript(a), Value::JavaScript(b)) => a.cmp(b),
            (
                Value::JavaScriptWithScope { code: ac, scope: asc },
                Value::JavaScriptWithScope { code: bc, scope: bsc },
            ) => ac.cmp(bc).then_with(|| asc.cmp(bsc)),
            (
                Value::Timestamp { increment: ai, time: at },
                Value::Timestamp { increment: bi, time: bt },
            ) => at.cmp(bt).then_with(|| ai.cmp(bi)),
            // Undefined, Null, MinKey, MaxKey carry no payload; numeric and
            // string variants were handled before the tag comparison.
            _ => Ordering::Equal,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Value::ObjectId(v)
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Value::Document(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::Array(values.into_iter().map(Into::into).collect())
    }
}
