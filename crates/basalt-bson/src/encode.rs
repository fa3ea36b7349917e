//! Document serialization.
//!
//! Layout: `int32 totalLength` (little-endian, includes itself and the
//! trailing NUL), a sequence of elements, one NUL byte. An element is a
//! type tag, a NUL-terminated name, then the type-specific payload.
//! Strings are `int32 length` (payload + trailing NUL) + UTF-8 + NUL.

use std::fmt::Write;

use crate::document::Document;
use crate::element::Element;
use crate::error::EncodeError;
use crate::value::Value;

impl Document {
    /// Serializes the document. The output length always equals
    /// [`Document::size`].
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::with_capacity(self.size());
        write_document(&mut out, self)?;
        Ok(out)
    }

    /// Local size-cap check, run before any socket write.
    pub fn check_size(&self, max: usize) -> Result<(), EncodeError> {
        let size = self.size();
        if size > max {
            return Err(EncodeError::TooLarge { size, max });
        }
        Ok(())
    }
}

pub fn write_document(out: &mut Vec<u8>, doc: &Document) -> Result<(), EncodeError> {
    out.extend_from_slice(&(doc.size() as i32).to_le_bytes());
    for element in doc.elements() {
        write_element(out, element)?;
    }
    out.push(0);
    Ok(())
}

fn write_element(out: &mut Vec<u8>, element: &Element) -> Result<(), EncodeError> {
    out.push(element.value().type_tag());
    write_cstring(out, element.name())?;
    write_value(out, element.value())
}

fn write_value(out: &mut Vec<u8>, value: &Value) -> Result<(), EncodeError> {
    match value {
        Value::Double(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::String(s) | Value::JavaScript(s) | Value::Symbol(s) => write_string(out, s),
        Value::Document(d) => write_document(out, d)?,
        Value::Array(values) => write_array(out, values)?,
        Value::Binary { subtype, bytes } => {
            out.extend_from_slice(&(bytes.len() as i32).to_le_bytes());
            out.push(*subtype);
            out.extend_from_slice(bytes);
        }
        Value::Undefined | Value::Null | Value::MinKey | Value::MaxKey => {}
        Value::ObjectId(id) => out.extend_from_slice(id.bytes()),
        Value::Boolean(v) => out.push(u8::from(*v)),
        Value::UtcDatetime(millis) => out.extend_from_slice(&millis.to_le_bytes()),
        Value::Regex { pattern, options } => {
            write_cstring(out, pattern)?;
            write_cstring(out, options)?;
        }
        Value::DbPointer { namespace, id } => {
            write_string(out, namespace);
            out.extend_from_slice(id.bytes());
        }
        Value::JavaScriptWithScope { code, scope } => {
            let total = 4 + (4 + code.len() + 1) + scope.size();
            out.extend_from_slice(&(total as i32).to_le_bytes());
            write_string(out, code);
            write_document(out, scope)?;
        }
        Value::Int32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Timestamp { increment, time } => {
            out.extend_from_slice(&increment.to_le_bytes());
            out.extend_from_slice(&time.to_le_bytes());
        }
        Value::Int64(v) => out.extend_from_slice(&v.to_le_bytes()),
    }
    Ok(())
}

fn write_array(out: &mut Vec<u8>, values: &[Value]) -> Result<(), EncodeError> {
    let size = Value::Array(values.to_vec()).size();
    let start = out.len();
    out.extend_from_slice(&(size as i32).to_le_bytes());
    let mut name = String::with_capacity(5);
    for (index, value) in values.iter().enumerate() {
        out.push(value.type_tag());
        name.clear();
        let _ = write!(name, "{index}");
        write_cstring(out, &name)?;
        write_value(out, value)?;
    }
    out.push(0);
    debug_assert_eq!(out.len() - start, size);
    Ok(())
}

/// NUL-terminated UTF-8, rejecting interior NULs.
pub fn write_cstring(out: &mut Vec<u8>, s: &str) -> Result<(), EncodeError> {
    if s.as_bytes().contains(&0) {
        return Err(EncodeError::InvalidName(s.to_string()));
    }
    out.extend_from_slice(s.as_bytes());
    out.push(0);
    Ok(())
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&((s.len() + 1) as i32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}
