use crate::document::Document;
use crate::element::Element;
use crate::value::Value;

/// Fluent constructor for [`Document`]s.
///
/// Adding an element whose name is already present replaces it in place,
/// preserving element order, so built documents always have distinct names.
#[derive(Debug, Default)]
pub struct DocumentBuilder {
    elements: Vec<Element>,
}

impl DocumentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(name, value);
        self
    }

    /// Non-consuming variant of [`add`](Self::add) for loop bodies.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let element = Element::new(name, value);
        match self.elements.iter().position(|e| e.name() == element.name()) {
            Some(at) => self.elements[at] = element,
            None => self.elements.push(element),
        }
    }

    pub fn push_element(&mut self, element: Element) {
        match self.elements.iter().position(|e| e.name() == element.name()) {
            Some(at) => self.elements[at] = element,
            None => self.elements.push(element),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn build(self) -> Document {
        Document::from_elements(self.elements)
    }
}

/// Fluent constructor for array values.
#[derive(Debug, Default)]
pub struct ArrayBuilder {
    values: Vec<Value>,
}

impl ArrayBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, value: impl Into<Value>) -> Self {
        self.values.push(value.into());
        self
    }

    pub fn push(&mut self, value: impl Into<Value>) {
        self.values.push(value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn build(self) -> Value {
        Value::Array(self.values)
    }
}

/// Builds a [`Document`] from `"name": value` pairs.
///
/// ```
/// use basalt_bson::{doc, Value};
///
/// let d = doc! { "name": "acme", "active": true, "retries": 3i32 };
/// assert_eq!(d.get_value("name"), Some(&Value::from("acme")));
/// ```
#[macro_export]
macro_rules! doc {
    () => { $crate::Document::new() };
    ( $( $name:literal : $value:expr ),+ $(,)? ) => {{
        let mut builder = $crate::DocumentBuilder::new();
        $( builder.push($name, $value); )+
        builder.build()
    }};
}
