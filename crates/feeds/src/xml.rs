//! Minimal element tree built on `quick-xml`'s pull reader.
//!
//! Feed documents are small, so the parsers work on an owned tree rather than
//! streaming. Element names keep their namespace prefix (`content:encoded`).
//! Elements marked `type="xhtml"` keep their inner markup verbatim as text.

use std::borrow::Cow;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

#[derive(Debug, Clone, Default)]
pub(crate) struct Node {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Node>,
}

impl Node {
    /// Element name without its namespace prefix.
    pub fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Trimmed text of the first child called `name`, or an empty string.
    pub fn child_text(&self, name: &str) -> String {
        self.child(name)
            .map(|c| c.text.trim().to_string())
            .unwrap_or_default()
    }

    /// Text of the first listed child that is present and non-empty.
    pub fn first_text(&self, names: &[&str]) -> Option<String> {
        names
            .iter()
            .map(|n| self.child_text(n))
            .find(|t| !t.is_empty())
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Parse a whole document into its root element.
pub(crate) fn parse_document(xml: &str) -> Result<Node, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Node> = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| format!("at byte {}: {e}", reader.buffer_position()))?;

        match event {
            Event::Start(e) => {
                let mut node = start_node(&e);
                if node.attr("type") != Some("xhtml") {
                    stack.push(node);
                    continue;
                }
                let end = e.to_end().into_owned();
                let inner = reader
                    .read_text(end.name())
                    .map_err(|e| format!("at byte {}: {e}", reader.buffer_position()))?;
                node.text = inner.trim().to_string();
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Ok(node),
                }
            }
            Event::Empty(e) => {
                let node = start_node(&e);
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Ok(node),
                }
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    let text = match t.unescape() {
                        Ok(s) => s.into_owned(),
                        // Undeclared HTML entities (`&nbsp;`) are common in feeds.
                        Err(_) => {
                            let raw = String::from_utf8_lossy(&t);
                            html_escape::decode_html_entities(&raw).into_owned()
                        }
                    };
                    push_text(&mut top.text, &text);
                }
            }
            Event::CData(c) => {
                if let Some(top) = stack.last_mut() {
                    push_text(&mut top.text, &String::from_utf8_lossy(&c));
                }
            }
            Event::End(_) => {
                let Some(node) = stack.pop() else {
                    return Err("unbalanced end tag".to_string());
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Ok(node),
                }
            }
            Event::Eof => return Err("document ended before the root element closed".to_string()),
            _ => {}
        }
    }
}

fn start_node(e: &BytesStart<'_>) -> Node {
    let attrs = e
        .attributes()
        .flatten()
        .map(|a| {
            let key = String::from_utf8_lossy(a.key.as_ref()).into_owned();
            let value = a
                .unescape_value()
                .map(Cow::into_owned)
                .unwrap_or_else(|_| String::from_utf8_lossy(&a.value).into_owned());
            (key, value)
        })
        .collect();

    Node {
        name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
        attrs,
        text: String::new(),
        children: Vec::new(),
    }
}

fn push_text(buf: &mut String, text: &str) {
    if !buf.is_empty() && !text.is_empty() {
        buf.push(' ');
    }
    buf.push_str(text);
}
