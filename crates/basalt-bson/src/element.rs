use std::cmp::Ordering;
use std::fmt;

use crate::value::Value;

/// One named, typed entry in a document.
///
/// Immutable once built. Ordering is (name, type tag, value) with the
/// cross-numeric and string/symbol promotions handled by [`Value`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    value: Value,
}

impl Element {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// Exact encoded length: type tag + name + NUL + value payload.
    pub fn size(&self) -> usize {
        1 + self.name.len() + 1 + self.value.size()
    }
}

impl PartialOrd for Element {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Element {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.value.cmp(&other.value))
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:?}", self.name, self.value)
    }
}
