//! Minimal namespace-aware XML tree used for request and response bodies.

use quick_xml::escape::{escape, unescape};
use quick_xml::events::Event;
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;

pub const DAV_NS: &str = "DAV:";

#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    #[error("xml syntax error: {0}")]
    Syntax(#[from] quick_xml::Error),
    #[error("invalid escape: {0}")]
    Escape(#[from] quick_xml::escape::EscapeError),
    #[error("malformed document: {0}")]
    Malformed(String),
}

/// Namespace qualified element name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QName {
    pub ns: String,
    pub name: String,
}

impl QName {
    pub fn new(ns: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            ns: ns.into(),
            name: name.into(),
        }
    }

    pub fn dav(name: &str) -> Self {
        Self::new(DAV_NS, name)
    }

    pub fn is_dav(&self) -> bool {
        self.ns == DAV_NS
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element {
    pub name: QName,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: QName) -> Self {
        Self {
            name,
            children: Vec::new(),
        }
    }

    pub fn dav(name: &str) -> Self {
        Self::new(QName::dav(name))
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    pub fn is_dav(&self, name: &str) -> bool {
        self.name.is_dav() && self.name.name == name
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// First child element in the `DAV:` namespace called `name`.
    pub fn dav_child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.is_dav(name))
    }

    /// Concatenated text content of this element and its descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for node in &self.children {
            match node {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) => e.collect_text(out),
            }
        }
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Node::Text(last)) = self.children.last_mut() {
            last.push_str(text);
        } else {
            self.children.push(Node::Text(text.to_string()));
        }
    }

    /// Indentation between child elements is not content. Text in leaf
    /// elements is kept verbatim.
    fn drop_layout_whitespace(&mut self) {
        if self.elements().next().is_none() {
            return;
        }
        self.children.retain(|node| match node {
            Node::Text(t) => !t.trim().is_empty(),
            Node::Element(_) => true,
        });
    }

    /// Serialize as a standalone document, declaring the `D` prefix for
    /// `DAV:` on the root element.
    pub fn to_document(&self) -> String {
        let mut out = String::from(r#"<?xml version="1.0" encoding="utf-8"?>"#);
        self.write(&mut out, "", true);
        out
    }

    /// Serialize into `out`. `DAV:` names use the `D` prefix; everything else
    /// is written unprefixed with a default namespace declaration whenever it
    /// differs from the one in scope.
    pub fn write(&self, out: &mut String, default_ns: &str, declare_dav: bool) {
        let tag = if self.name.is_dav() {
            format!("D:{}", self.name.name)
        } else {
            self.name.name.clone()
        };
        out.push('<');
        out.push_str(&tag);
        if declare_dav {
            out.push_str(r#" xmlns:D="DAV:""#);
        }
        let mut scope = default_ns;
        if !self.name.is_dav() && self.name.ns != default_ns {
            out.push_str(" xmlns=\"");
            out.push_str(&escape(self.name.ns.as_str()));
            out.push('"');
            scope = &self.name.ns;
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for node in &self.children {
            match node {
                Node::Text(t) => out.push_str(&escape(t.as_str())),
                Node::Element(e) => e.write(out, scope, false),
            }
        }
        out.push_str("</");
        out.push_str(&tag);
        out.push('>');
    }
}

fn qname(ns: ResolveResult<'_>, local: &[u8]) -> Result<QName, XmlError> {
    let ns = match ns {
        ResolveResult::Bound(Namespace(ns)) => std::str::from_utf8(ns)
            .map_err(|_| XmlError::Malformed("namespace is not utf-8".into()))?
            .to_string(),
        ResolveResult::Unbound => String::new(),
        ResolveResult::Unknown(prefix) => {
            return Err(XmlError::Malformed(format!(
                "unknown namespace prefix {}",
                String::from_utf8_lossy(&prefix)
            )))
        }
    };
    let name = std::str::from_utf8(local)
        .map_err(|_| XmlError::Malformed("element name is not utf-8".into()))?;
    Ok(QName::new(ns, name))
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.push(element);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(XmlError::Malformed("multiple root elements".into())),
    }
}

/// Parse a request body into an element tree.
pub fn parse(body: &[u8]) -> Result<Element, XmlError> {
    let mut reader = NsReader::from_reader(body);

    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;
    loop {
        match reader.read_resolved_event_into(&mut buf)? {
            (ns, Event::Start(start)) => {
                stack.push(Element::new(qname(ns, start.local_name().as_ref())?));
            }
            (ns, Event::Empty(start)) => {
                let element = Element::new(qname(ns, start.local_name().as_ref())?);
                attach(&mut stack, &mut root, element)?;
            }
            (_, Event::End(_)) => {
                let mut element = stack
                    .pop()
                    .ok_or_else(|| XmlError::Malformed("unbalanced end tag".into()))?;
                element.drop_layout_whitespace();
                attach(&mut stack, &mut root, element)?;
            }
            (_, Event::Text(text)) => {
                let raw = std::str::from_utf8(&text)
                    .map_err(|_| XmlError::Malformed("text is not utf-8".into()))?;
                if let Some(top) = stack.last_mut() {
                    top.push_text(&unescape(raw)?);
                }
            }
            (_, Event::GeneralRef(reference)) => {
                let name = std::str::from_utf8(&reference)
                    .map_err(|_| XmlError::Malformed("entity is not utf-8".into()))?;
                if let Some(top) = stack.last_mut() {
                    top.push_text(&unescape(&format!("&{name};"))?);
                }
            }
            (_, Event::CData(data)) => {
                if let Some(top) = stack.last_mut() {
                    top.push_text(&String::from_utf8_lossy(&data));
                }
            }
            (_, Event::Eof) => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(XmlError::Malformed("unexpected end of document".into()));
    }
    root.ok_or_else(|| XmlError::Malformed("empty document".into()))
}
