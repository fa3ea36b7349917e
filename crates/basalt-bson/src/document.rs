use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::element::Element;
use crate::oid::ObjectId;
use crate::value::Value;

/// An ordered sequence of named elements with distinct names.
///
/// Lookup by name is O(1) through an index built lazily on first access.
/// Documents are immutable; construction goes through [`DocumentBuilder`]
/// or the [`doc!`](crate::doc) macro.
///
/// [`DocumentBuilder`]: crate::DocumentBuilder
#[derive(Debug, Clone, Default)]
pub struct Document {
    elements: Vec<Element>,
    index: OnceLock<HashMap<String, usize>>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_elements(elements: Vec<Element>) -> Self {
        Self {
            elements,
            index: OnceLock::new(),
        }
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    fn index(&self) -> &HashMap<String, usize> {
        self.index.get_or_init(|| {
            let mut map = HashMap::with_capacity(self.elements.len());
            for (at, element) in self.elements.iter().enumerate() {
                map.entry(element.name().to_string()).or_insert(at);
            }
            map
        })
    }

    pub fn get(&self, name: &str) -> Option<&Element> {
        self.index().get(name).map(|&at| &self.elements[at])
    }

    pub fn get_value(&self, name: &str) -> Option<&Value> {
        self.get(name).map(Element::value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index().contains_key(name)
    }

    /// Exact encoded length: 4-byte length prefix + elements + trailing NUL.
    pub fn size(&self) -> usize {
        4 + self.elements.iter().map(Element::size).sum::<usize>() + 1
    }

    /// Depth-first path query. Each matcher constrains one nesting level;
    /// array entries match against their stringified index.
    pub fn find(&self, path: &[PathMatcher]) -> Vec<&Value> {
        let mut found = Vec::new();
        for element in &self.elements {
            find_in(element.name(), element.value(), path, &mut found);
        }
        found
    }

    pub fn find_first(&self, path: &[PathMatcher]) -> Option<&Value> {
        let mut found = self.find(path);
        if found.is_empty() { None } else { Some(found.remove(0)) }
    }

    /// Returns a document that is guaranteed to carry an `_id` element at
    /// the head, generating one when absent. Idempotent: a document that
    /// already has a top-level `_id` is returned unchanged.
    pub fn ensure_id(self) -> Document {
        if self.contains("_id") {
            return self;
        }
        let mut elements = Vec::with_capacity(self.elements.len() + 1);
        elements.push(Element::new("_id", ObjectId::new()));
        elements.extend(self.elements);
        Document::from_elements(elements)
    }
}

fn find_in<'a>(name: &str, value: &'a Value, path: &[PathMatcher], found: &mut Vec<&'a Value>) {
    let Some((matcher, rest)) = path.split_first() else {
        return;
    };
    if !matcher.matches(name) {
        return;
    }
    if rest.is_empty() {
        found.push(value);
        return;
    }
    match value {
        Value::Document(inner) => {
            for element in inner.elements() {
                find_in(element.name(), element.value(), rest, found);
            }
        }
        Value::Array(values) => {
            for (at, entry) in values.iter().enumerate() {
                find_in(&at.to_string(), entry, rest, found);
            }
        }
        _ => {}
    }
}

/// One level of a path query: a literal name, a compiled pattern, or a
/// match-anything wildcard.
#[derive(Debug, Clone)]
pub enum PathMatcher {
    Literal(String),
    Pattern(Regex),
    Any,
}

impl PathMatcher {
    pub fn literal(name: impl Into<String>) -> Self {
        PathMatcher::Literal(name.into())
    }

    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(PathMatcher::Pattern(Regex::new(pattern)?))
    }

    pub fn any() -> Self {
        PathMatcher::Any
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            PathMatcher::Literal(expected) => expected == name,
            PathMatcher::Pattern(re) => re.is_match(name),
            PathMatcher::Any => true,
        }
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.elements == other.elements
    }
}

impl Eq for Document {}

impl PartialOrd for Document {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Document {
    fn cmp(&self, other: &Self) -> Ordering {
        self.elements.cmp(&other.elements)
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (at, element) in self.elements.iter().enumerate() {
            if at > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{element}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn empty_document_is_five_bytes() {
        assert_eq!(Document::new().size(), 5);
    }

    #[test]
    fn get_is_by_name() {
        let doc = doc! { "a": 1i32, "b": 2i32 };
        assert_eq!(doc.get("b").unwrap().value(), &Value::Int32(2));
        assert!(doc.get("missing").is_none());
    }

    #[test]
    fn ensure_id_injects_at_head_once() {
        let doc = doc! { "name": "x" }.ensure_id();
        assert_eq!(doc.elements()[0].name(), "_id");
        let again = doc.clone().ensure_id();
        assert_eq!(doc, again);
    }

    #[test]
    fn ensure_id_on_empty_doc_is_22_bytes() {
        // 5 (document overhead) + 1 (tag) + 4 ("_id" + NUL) + 12 (id).
        assert_eq!(Document::new().ensure_id().size(), 22);
    }

    #[test]
    fn find_descends_literal_paths() {
        let doc = doc! { "outer": doc! { "inner": 7i32 } };
        let hits = doc.find(&[PathMatcher::literal("outer"), PathMatcher::literal("inner")]);
        assert_eq!(hits, vec![&Value::Int32(7)]);
    }

    #[test]
    fn find_traverses_arrays_by_index_name() {
        let doc = doc! {
            "members": vec![
                Value::from(doc! { "name": "a", "state": 1i32 }),
                Value::from(doc! { "name": "b", "state": 2i32 }),
            ],
        };
        let hits = doc.find(&[
            PathMatcher::literal("members"),
            PathMatcher::any(),
            PathMatcher::literal("state"),
        ]);
        assert_eq!(hits, vec![&Value::Int32(1), &Value::Int32(2)]);
    }

    #[test]
    fn find_first_returns_document_order_match() {
        let doc = doc! { "a": doc! { "x": 1i32 }, "b": doc! { "x": 2i32 } };
        let hit = doc
            .find_first(&[PathMatcher::any(), PathMatcher::literal("x")])
            .unwrap();
        assert_eq!(hit, &Value::Int32(1));
    }
}
