//! Minimal element tree over `quick-xml` events.
//!
//! Element and attribute names are reduced to their local part. Namespaces are
//! resolved where declared; an undeclared prefix (CAS servers commonly emit
//! `cas:` without binding it) leaves the namespace unset instead of failing.
//! Documents nested deeper than [`MAX_DEPTH`] are rejected while reading, so
//! the tree walks below never recurse past that bound.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::validation::error::ValidationError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub namespace: Option<String>,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    text: String,
}

/// Deepest element nesting accepted from a server response.
pub const MAX_DEPTH: usize = 64;

/// Namespace declarations introduced by one element.
type Scope = Vec<(Option<String>, String)>;

impl XmlElement {
    /// Parse a document into its root element.
    pub fn parse(document: &str) -> Result<XmlElement, ValidationError> {
        let mut reader = Reader::from_str(document);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<(XmlElement, Scope)> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            let event = reader.read_event().map_err(|e| {
                ValidationError::protocol(format!(
                    "malformed XML at byte {}: {}",
                    reader.buffer_position(),
                    e
                ))
            })?;

            match event {
                Event::Start(start) => {
                    if root.is_some() {
                        return Err(ValidationError::protocol("multiple root elements"));
                    }
                    if stack.len() >= MAX_DEPTH {
                        return Err(ValidationError::protocol("XML nesting too deep"));
                    }
                    let (element, scope) = open_element(&start, &stack)?;
                    stack.push((element, scope));
                }
                Event::Empty(start) => {
                    if root.is_some() {
                        return Err(ValidationError::protocol("multiple root elements"));
                    }
                    if stack.len() >= MAX_DEPTH {
                        return Err(ValidationError::protocol("XML nesting too deep"));
                    }
                    let (element, _) = open_element(&start, &stack)?;
                    attach(element, &mut stack, &mut root);
                }
                Event::End(_) => {
                    // quick-xml already verified the end name matches.
                    if let Some((element, _)) = stack.pop() {
                        attach(element, &mut stack, &mut root);
                    }
                }
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|e| ValidationError::protocol(format!("bad text content: {}", e)))?;
                    match stack.last_mut() {
                        Some((element, _)) => element.text.push_str(&text),
                        None if text.trim().is_empty() => {}
                        None => {
                            return Err(ValidationError::protocol(
                                "text content outside of the root element",
                            ))
                        }
                    }
                }
                Event::CData(data) => {
                    if let Some((element, _)) = stack.last_mut() {
                        element.text.push_str(&String::from_utf8_lossy(&data));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(ValidationError::protocol("unexpected end of XML document"));
        }
        root.ok_or_else(|| ValidationError::protocol("XML document has no root element"))
    }

    /// Trimmed text directly inside this element.
    pub fn text(&self) -> &str {
        self.text.trim()
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// First element named `name` in document order, excluding `self`.
    pub fn descendant(&self, name: &str) -> Option<&XmlElement> {
        for child in &self.children {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.descendant(name) {
                return Some(found);
            }
        }
        None
    }

    /// All elements named `name` in document order, excluding `self`.
    pub fn descendants_named<'a>(&'a self, name: &str) -> Vec<&'a XmlElement> {
        let mut found = Vec::new();
        self.collect_descendants(name, &mut found);
        found
    }

    fn collect_descendants<'a>(&'a self, name: &str, found: &mut Vec<&'a XmlElement>) {
        for child in &self.children {
            if child.name == name {
                found.push(child);
            }
            child.collect_descendants(name, found);
        }
    }

    pub fn in_namespace(&self, prefix: &str) -> bool {
        self.namespace
            .as_deref()
            .map_or(false, |ns| ns.starts_with(prefix))
    }
}

fn open_element(
    start: &BytesStart<'_>,
    stack: &[(XmlElement, Scope)],
) -> Result<(XmlElement, Scope), ValidationError> {
    let mut scope = Scope::new();
    let mut attributes = Vec::new();

    for attribute in start.attributes() {
        let attribute = attribute
            .map_err(|e| ValidationError::protocol(format!("malformed attribute: {}", e)))?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|e| ValidationError::protocol(format!("bad attribute value: {}", e)))?
            .into_owned();

        if key == "xmlns" {
            scope.push((None, value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            scope.push((Some(prefix.to_string()), value));
        } else {
            let local = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
            attributes.push((local, value));
        }
    }

    let qname = start.name();
    let prefix = qname
        .prefix()
        .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned());
    let name = String::from_utf8_lossy(qname.local_name().as_ref()).into_owned();
    let namespace = resolve(prefix.as_deref(), &scope, stack);

    Ok((
        XmlElement {
            name,
            namespace,
            attributes,
            children: Vec::new(),
            text: String::new(),
        },
        scope,
    ))
}

fn resolve(prefix: Option<&str>, own: &Scope, stack: &[(XmlElement, Scope)]) -> Option<String> {
    std::iter::once(own)
        .chain(stack.iter().rev().map(|(_, scope)| scope))
        .flat_map(|scope| scope.iter().rev())
        .find(|(p, _)| p.as_deref() == prefix)
        .map(|(_, uri)| uri.clone())
}

fn attach(
    element: XmlElement,
    stack: &mut [(XmlElement, Scope)],
    root: &mut Option<XmlElement>,
) {
    match stack.last_mut() {
        Some((parent, _)) => parent.children.push(element),
        None => *root = Some(element),
    }
}
