//! Document deserialization.
//!
//! Parsers take a byte slice and return `(parsed, remaining)` so callers
//! can walk concatenated documents without a cursor type. UTF-8 is
//! validated on every string and name.

use crate::document::Document;
use crate::element::Element;
use crate::error::DecodeError;
use crate::oid::ObjectId;
use crate::value::Value;

impl Document {
    /// Decodes one document from the front of `input`, requiring that the
    /// input contains exactly one document.
    pub fn from_bytes(input: &[u8]) -> Result<Document, DecodeError> {
        let (doc, rest) = read_document(input)?;
        if !rest.is_empty() {
            return Err(DecodeError::BadLength(input.len() as i32));
        }
        Ok(doc)
    }
}

/// Decodes one document from the front of `input`, returning the rest.
pub fn read_document(input: &[u8]) -> Result<(Document, &[u8]), DecodeError> {
    let (len, _) = read_i32(input)?;
    if len < 5 {
        return Err(DecodeError::BadLength(len));
    }
    let len = len as usize;
    if input.len() < len {
        return Err(DecodeError::Truncated);
    }
    if input[len - 1] != 0 {
        return Err(DecodeError::MissingTerminator);
    }

    let mut body = &input[4..len - 1];
    let mut elements = Vec::new();
    while !body.is_empty() {
        let (element, rest) = read_element(body)?;
        elements.push(element);
        body = rest;
    }
    Ok((Document::from_elements(elements), &input[len..]))
}

fn read_element(input: &[u8]) -> Result<(Element, &[u8]), DecodeError> {
    let (&tag, rest) = input.split_first().ok_or(DecodeError::Truncated)?;
    let (name, rest) = read_cstring(rest)?;
    let (value, rest) = read_value(tag, rest)?;
    Ok((Element::new(name, value), rest))
}

fn read_value(tag: u8, input: &[u8]) -> Result<(Value, &[u8]), DecodeError> {
    match tag {
        0x01 => {
            let (bits, rest) = read_i64(input)?;
            Ok((Value::Double(f64::from_bits(bits as u64)), rest))
        }
        0x02 => {
            let (s, rest) = read_string(input)?;
            Ok((Value::String(s), rest))
        }
        0x03 => {
            let (doc, rest) = read_document(input)?;
            Ok((Value::Document(doc), rest))
        }
        0x04 => {
            let (doc, rest) = read_document(input)?;
            let values = doc.elements().iter().map(|e| e.value().clone()).collect();
            Ok((Value::Array(values), rest))
        }
        0x05 => {
            let (len, rest) = read_i32(input)?;
            if len < 0 {
                return Err(DecodeError::BadLength(len));
            }
            let len = len as usize;
            let (&subtype, rest) = rest.split_first().ok_or(DecodeError::Truncated)?;
            if rest.len() < len {
                return Err(DecodeError::Truncated);
            }
            let (bytes, rest) = rest.split_at(len);
            Ok((
                Value::Binary {
                    subtype,
                    bytes: bytes.to_vec(),
                },
                rest,
            ))
        }
        0x06 => Ok((Value::Undefined, input)),
        0x07 => {
            let (bytes, rest) = read_fixed::<12>(input)?;
            Ok((Value::ObjectId(ObjectId::from_bytes(bytes)), rest))
        }
        0x08 => {
            let (&byte, rest) = input.split_first().ok_or(DecodeError::Truncated)?;
            Ok((Value::Boolean(byte != 0), rest))
        }
        0x09 => {
            let (millis, rest) = read_i64(input)?;
            Ok((Value::UtcDatetime(millis), rest))
        }
        0x0A => Ok((Value::Null, input)),
        0x0B => {
            let (pattern, rest) = read_cstring(input)?;
            let (options, rest) = read_cstring(rest)?;
            Ok((Value::Regex { pattern, options }, rest))
        }
        0x0C => {
            let (namespace, rest) = read_string(input)?;
            let (bytes, rest) = read_fixed::<12>(rest)?;
            Ok((
                Value::DbPointer {
                    namespace,
                    id: ObjectId::from_bytes(bytes),
                },
                rest,
            ))
        }
        0x0D => {
            let (code, rest) = read_string(input)?;
            Ok((Value::JavaScript(code), rest))
        }
        0x0E => {
            let (s, rest) = read_string(input)?;
            Ok((Value::Symbol(s), rest))
        }
        0x0F => {
            let (total, rest) = read_i32(input)?;
            if total < 4 {
                return Err(DecodeError::BadLength(total));
            }
            let (code, rest) = read_string(rest)?;
            let (scope, rest) = read_document(rest)?;
            Ok((Value::JavaScriptWithScope { code, scope }, rest))
        }
        0x10 => {
            let (v, rest) = read_i32(input)?;
            Ok((Value::Int32(v), rest))
        }
        0x11 => {
            let (increment, rest) = read_i32(input)?;
            let (time, rest) = read_i32(rest)?;
            Ok((
                Value::Timestamp {
                    increment: increment as u32,
                    time: time as u32,
                },
                rest,
            ))
        }
        0x12 => {
            let (v, rest) = read_i64(input)?;
            Ok((Value::Int64(v), rest))
        }
        0xFF => Ok((Value::MinKey, input)),
        0x7F => Ok((Value::MaxKey, input)),
        other => Err(DecodeError::UnknownType(other)),
    }
}

pub(crate) fn read_i32(input: &[u8]) -> Result<(i32, &[u8]), DecodeError> {
    let (bytes, rest) = read_fixed::<4>(input)?;
    Ok((i32::from_le_bytes(bytes), rest))
}

pub(crate) fn read_i64(input: &[u8]) -> Result<(i64, &[u8]), DecodeError> {
    let (bytes, rest) = read_fixed::<8>(input)?;
    Ok((i64::from_le_bytes(bytes), rest))
}

fn read_fixed<const N: usize>(input: &[u8]) -> Result<([u8; N], &[u8]), DecodeError> {
    if input.len() < N {
        return Err(DecodeError::Truncated);
    }
    let (head, rest) = input.split_at(N);
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(head);
    Ok((bytes, rest))
}

fn read_cstring(input: &[u8]) -> Result<(String, &[u8]), DecodeError> {
    let nul = input
        .iter()
        .position(|&b| b == 0)
        .ok_or(DecodeError::Truncated)?;
    let s = std::str::from_utf8(&input[..nul]).map_err(|_| DecodeError::InvalidUtf8)?;
    Ok((s.to_string(), &input[nul + 1..]))
}

fn read_string(input: &[u8]) -> Result<(String, &[u8]), DecodeError> {
    let (len, rest) = read_i32(input)?;
    if len < 1 {
        return Err(DecodeError::BadLength(len));
    }
    let len = len as usize;
    if rest.len() < len {
        return Err(DecodeError::Truncated);
    }
    if rest[len - 1] != 0 {
        return Err(DecodeError::MissingTerminator);
    }
    let s = std::str::from_utf8(&rest[..len - 1]).map_err(|_| DecodeError::InvalidUtf8)?;
    Ok((s.to_string(), &rest[len..]))
}
