//! Generic element-tree parsing.
//!
//! Parses a markup document into a tree of [`Element`]s, keeping tags,
//! attributes, text content, and child order. The parser is tolerant of
//! content it does not understand (declarations, comments, processing
//! instructions are skipped) but strict about structure: unbalanced or
//! mismatched tags fail with [`DataError::MarkupParse`] carrying the byte
//! offset of the problem.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::core::errors::{DataError, DataResult};

/// Tag of the synthetic root wrapping the document's top-level elements.
pub const DOCUMENT_TAG: &str = "#document";

/// One element of the parsed tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// The element's tag name.
    pub tag: String,
    /// Attributes in document order.
    pub attributes: Vec<(String, String)>,
    /// Directly contained text, whitespace-trimmed and space-joined.
    pub text: String,
    /// Child elements in document order.
    pub children: Vec<Element>,
}

impl Element {
    fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Vec::new(),
            text: String::new(),
            children: Vec::new(),
        }
    }

    /// Looks up an attribute value by name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Concatenates the text of this element and all descendants in document
    /// order, joined by single spaces.
    pub fn deep_text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        if !self.text.is_empty() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&self.text);
        }
        for child in &self.children {
            child.collect_text(out);
        }
    }
}

/// Parses a markup document into an element tree.
///
/// Returns a synthetic root element (tag [`DOCUMENT_TAG`]) whose children
/// are the document's top-level elements, so documents with or without a
/// single outer element parse uniformly.
pub fn parse(input: &str) -> DataResult<Element> {
    let mut reader = Reader::from_str(input);
    reader.trim_text(true);

    // Open elements, innermost last. The synthetic root is never popped.
    let mut stack: Vec<Element> = vec![Element::new(DOCUMENT_TAG)];

    loop {
        let position = reader.buffer_position() as u64;
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                stack.push(element_from(&start, position)?);
            }
            Ok(Event::Empty(start)) => {
                let element = element_from(&start, position)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => {
                        return Err(DataError::markup_parse(position, "no open element"));
                    }
                }
            }
            Ok(Event::End(end)) => {
                let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                let element = match stack.pop() {
                    Some(element) if element.tag != DOCUMENT_TAG => element,
                    _ => {
                        return Err(DataError::markup_parse(
                            position,
                            format!("closing tag '</{name}>' has no matching opening tag"),
                        ));
                    }
                };
                if element.tag != name {
                    return Err(DataError::markup_parse(
                        position,
                        format!("expected '</{}>', found '</{name}>'", element.tag),
                    ));
                }
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => {
                        return Err(DataError::markup_parse(position, "no open element"));
                    }
                }
            }
            Ok(Event::Text(text)) => {
                let unescaped = text.unescape().map_err(|e| {
                    DataError::markup_parse(position, format!("bad text content: {e}"))
                })?;
                if let Some(current) = stack.last_mut() {
                    append_text(current, unescaped.trim());
                }
            }
            Ok(Event::CData(data)) => {
                let raw = String::from_utf8_lossy(&data).into_owned();
                if let Some(current) = stack.last_mut() {
                    append_text(current, raw.trim());
                }
            }
            Ok(Event::Eof) => break,
            // Declarations, comments, processing instructions, doctypes.
            Ok(_) => {}
            Err(e) => {
                return Err(DataError::markup_parse(
                    reader.buffer_position() as u64,
                    e.to_string(),
                ));
            }
        }
    }

    if stack.len() > 1 {
        let unclosed = stack
            .pop()
            .map(|e| e.tag)
            .unwrap_or_else(|| DOCUMENT_TAG.to_string());
        return Err(DataError::markup_parse(
            reader.buffer_position() as u64,
            format!("unclosed element '<{unclosed}>'"),
        ));
    }
    stack
        .pop()
        .ok_or_else(|| DataError::markup_parse(reader.buffer_position() as u64, "empty document"))
}

fn element_from(start: &BytesStart<'_>, position: u64) -> DataResult<Element> {
    let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut element = Element::new(&tag);
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| {
            DataError::markup_parse(position, format!("bad attribute in '<{tag}>': {e}"))
        })?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|e| {
                DataError::markup_parse(
                    position,
                    format!("bad attribute value in '<{tag}>': {e}"),
                )
            })?
            .into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn append_text(element: &mut Element, text: &str) {
    if text.is_empty() {
        return;
    }
    if !element.text.is_empty() {
        element.text.push(' ');
    }
    element.text.push_str(text);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_elements_with_attributes() {
        let root = parse(r#"<div class="outer" id="a"><span class="inner">hi</span></div>"#)
            .unwrap();
        assert_eq!(root.tag, DOCUMENT_TAG);
        assert_eq!(root.children.len(), 1);

        let div = &root.children[0];
        assert_eq!(div.tag, "div");
        assert_eq!(div.attribute("class"), Some("outer"));
        assert_eq!(div.attribute("id"), Some("a"));
        assert_eq!(div.attribute("missing"), None);

        let span = &div.children[0];
        assert_eq!(span.tag, "span");
        assert_eq!(span.text, "hi");
    }

    #[test]
    fn unescapes_entities_in_text_and_attributes() {
        let root = parse(r#"<p title="a &amp; b">x &lt; y</p>"#).unwrap();
        let p = &root.children[0];
        assert_eq!(p.attribute("title"), Some("a & b"));
        assert_eq!(p.text, "x < y");
    }

    #[test]
    fn deep_text_joins_descendants_in_order() {
        let root = parse("<p>one <b>two</b> three</p>").unwrap();
        assert_eq!(root.children[0].deep_text(), "one two three");
    }

    #[test]
    fn skips_declaration_doctype_and_comments() {
        let input = "<?xml version=\"1.0\"?><!DOCTYPE html><!-- note --><html><body/></html>";
        let root = parse(input).unwrap();
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].tag, "html");
        assert_eq!(root.children[0].children[0].tag, "body");
    }

    #[test]
    fn self_closing_elements_become_children() {
        let root = parse("<div><br/><img src=\"x.png\"/></div>").unwrap();
        let div = &root.children[0];
        assert_eq!(div.children.len(), 2);
        assert_eq!(div.children[1].attribute("src"), Some("x.png"));
    }

    #[test]
    fn unclosed_element_is_a_parse_error() {
        let err = parse("<div><span>hi</span>").unwrap_err();
        assert!(matches!(err, DataError::MarkupParse { .. }));
        assert!(err.to_string().contains("div"));
    }

    #[test]
    fn stray_closing_tag_is_a_parse_error() {
        let err = parse("<div></div></div>").unwrap_err();
        assert!(matches!(err, DataError::MarkupParse { .. }));
    }

    #[test]
    fn mismatched_tags_are_a_parse_error() {
        let err = parse("<a><b></a></b>").unwrap_err();
        assert!(matches!(err, DataError::MarkupParse { .. }));
    }
}
