//! Minimal XML tree used by the codec and the policy parser.
//!
//! Documents here are small (envelopes, policy bodies), so they are read
//! fully into an [`Element`] tree with quick-xml and then walked. Writing goes
//! through [`XmlOut`], which escapes attribute values and text.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

/// Maximum nesting depth accepted by [`parse_document`].
const MAX_DEPTH: usize = 64;

/// Errors from reading or writing XML.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum XmlError {
    #[error("document is not UTF-8")]
    NotUtf8,

    #[error("xml syntax: {0}")]
    Syntax(String),

    #[error("document has no root element")]
    NoRoot,

    #[error("content after the root element")]
    TrailingContent,

    #[error("unclosed element <{0}>")]
    Unclosed(String),

    #[error("nesting deeper than {MAX_DEPTH} levels")]
    TooDeep,

    #[error("xml write: {0}")]
    Write(String),
}

/// A parsed element: name, attributes in document order, children and text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn children(&self) -> &[Element] {
        &self.children
    }

    /// First child with the given name.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    /// All children with the given name, in document order.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Concatenated, trimmed text content directly inside this element.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Parse a complete document into its root element.
///
/// # Errors
///
/// Fails on non-UTF-8 input, syntax errors, mismatched or unclosed tags,
/// missing root, and any element or text after the root closes.
pub fn parse_document(bytes: &[u8]) -> Result<Element, XmlError> {
    let source = std::str::from_utf8(bytes).map_err(|_| XmlError::NotUtf8)?;
    let mut reader = Reader::from_str(source);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| XmlError::Syntax(e.to_string()))?;
        match event {
            Event::Start(start) => {
                if root.is_some() {
                    return Err(XmlError::TrailingContent);
                }
                if stack.len() >= MAX_DEPTH {
                    return Err(XmlError::TooDeep);
                }
                stack.push(open_element(&start)?);
            }
            Event::Empty(start) => {
                if root.is_some() {
                    return Err(XmlError::TrailingContent);
                }
                let element = open_element(&start)?;
                close_element(&mut stack, &mut root, element);
            }
            Event::End(_) => {
                // quick-xml checks that end names match their start tags.
                let element = stack
                    .pop()
                    .ok_or_else(|| XmlError::Syntax("unexpected end tag".to_string()))?;
                close_element(&mut stack, &mut root, element);
            }
            Event::Text(text) => {
                let value = text
                    .unescape()
                    .map_err(|e| XmlError::Syntax(e.to_string()))?;
                append_text(&mut stack, &root, &value)?;
            }
            Event::CData(data) => {
                let raw = data.into_inner();
                let value = std::str::from_utf8(&raw).map_err(|_| XmlError::NotUtf8)?;
                append_text(&mut stack, &root, value)?;
            }
            Event::Eof => break,
            // Declarations, comments, processing instructions and doctypes carry no data.
            _ => {}
        }
    }

    if let Some(open) = stack.pop() {
        return Err(XmlError::Unclosed(open.name));
    }
    root.ok_or(XmlError::NoRoot)
}

fn open_element(start: &BytesStart<'_>) -> Result<Element, XmlError> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|_| XmlError::NotUtf8)?
        .to_string();

    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| XmlError::Syntax(e.to_string()))?;
        let key = std::str::from_utf8(attribute.key.as_ref())
            .map_err(|_| XmlError::NotUtf8)?
            .to_string();
        let value = attribute
            .unescape_value()
            .map_err(|e| XmlError::Syntax(e.to_string()))?
            .into_owned();
        attributes.push((key, value));
    }

    Ok(Element {
        name,
        attributes,
        children: Vec::new(),
        text: String::new(),
    })
}

fn close_element(stack: &mut Vec<Element>, root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => *root = Some(element),
    }
}

fn append_text(stack: &mut [Element], root: &Option<Element>, value: &str) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(current) => {
            current.text.push_str(value.trim());
            Ok(())
        }
        None if value.trim().is_empty() => Ok(()),
        None if root.is_some() => Err(XmlError::TrailingContent),
        None => Err(XmlError::Syntax("text outside the root element".to_string())),
    }
}

/// Streaming XML writer with escaping.
pub struct XmlOut {
    writer: Writer<Vec<u8>>,
}

impl XmlOut {
    #[must_use]
    pub fn new() -> Self {
        Self {
            writer: Writer::new(Vec::with_capacity(512)),
        }
    }

    pub fn start(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<(), XmlError> {
        let start = BytesStart::new(name).with_attributes(attributes.iter().copied());
        self.write(Event::Start(start))
    }

    pub fn empty(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<(), XmlError> {
        let start = BytesStart::new(name).with_attributes(attributes.iter().copied());
        self.write(Event::Empty(start))
    }

    pub fn end(&mut self, name: &str) -> Result<(), XmlError> {
        self.write(Event::End(BytesEnd::new(name)))
    }

    pub fn text(&mut self, value: &str) -> Result<(), XmlError> {
        self.write(Event::Text(BytesText::new(value)))
    }

    /// `<name>value</name>`
    pub fn text_element(&mut self, name: &str, value: &str) -> Result<(), XmlError> {
        self.start(name, &[])?;
        self.text(value)?;
        self.end(name)
    }

    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.writer.into_inner()
    }

    fn write(&mut self, event: Event<'_>) -> Result<(), XmlError> {
        self.writer
            .write_event(event)
            .map_err(|e| XmlError::Write(e.to_string()))
    }
}

impl Default for XmlOut {
    fn default() -> Self {
        Self::new()
    }
}
