//! XML text form of events and detail trees.
//!
//! Rendering is canonical: no inter-tag whitespace, no XML declaration,
//! attributes in stored order, empty elements self-closed. Parsing accepts
//! any well-formed document and drops whitespace-only text, so
//! `parse(render(x)) == x` for every tree built from parsed input.

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::event::{CotEvent, DetailNode, Point, UNKNOWN_METRIC};
use crate::CodecError;

fn xml_err(e: impl std::fmt::Display) -> CodecError {
    CodecError::Xml(e.to_string())
}

impl DetailNode {
    /// Render this element and its subtree as canonical XML.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attributes {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape(value.as_str()));
            out.push('"');
        }
        if self.children.is_empty() && self.text.is_none() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        if let Some(text) = &self.text {
            out.push_str(&escape(text.as_str()));
        }
        for child in &self.children {
            child.write_xml(out);
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }

    /// Parse a document into its root element.
    pub fn parse(xml: &str) -> Result<DetailNode, CodecError> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<DetailNode> = Vec::new();
        let mut root: Option<DetailNode> = None;

        loop {
            match reader.read_event().map_err(xml_err)? {
                Event::Start(start) => stack.push(node_from_start(&start)?),
                Event::Empty(start) => {
                    let node = node_from_start(&start)?;
                    attach(&mut stack, &mut root, node)?;
                }
                Event::End(_) => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| CodecError::Xml("unbalanced end tag".into()))?;
                    attach(&mut stack, &mut root, node)?;
                }
                Event::Text(text) => {
                    let text = text.unescape().map_err(xml_err)?;
                    push_text(&mut stack, &text)?;
                }
                Event::CData(data) => {
                    let text = String::from_utf8(data.into_inner().into_owned()).map_err(xml_err)?;
                    push_text(&mut stack, &text)?;
                }
                Event::Eof => break,
                // Declarations, comments, processing instructions, doctype.
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(CodecError::Xml(format!("unclosed element <{}>", open.name)));
        }
        root.ok_or_else(|| CodecError::Xml("document has no root element".into()))
    }
}

fn node_from_start(start: &BytesStart<'_>) -> Result<DetailNode, CodecError> {
    let qname = start.name();
    let name = std::str::from_utf8(qname.as_ref()).map_err(xml_err)?;
    let mut node = DetailNode::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(xml_err)?;
        let key = std::str::from_utf8(attr.key.as_ref()).map_err(xml_err)?.to_string();
        let value = attr.unescape_value().map_err(xml_err)?.into_owned();
        node.attributes.push((key, value));
    }
    Ok(node)
}

fn attach(
    stack: &mut [DetailNode],
    root: &mut Option<DetailNode>,
    node: DetailNode,
) -> Result<(), CodecError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None if root.is_none() => *root = Some(node),
        None => return Err(CodecError::Xml("multiple root elements".into())),
    }
    Ok(())
}

fn push_text(stack: &mut [DetailNode], text: &str) -> Result<(), CodecError> {
    if text.trim().is_empty() {
        return Ok(());
    }
    match stack.last_mut() {
        Some(node) => {
            node.text.get_or_insert_with(String::new).push_str(text);
            Ok(())
        }
        None => Err(CodecError::Xml("text outside root element".into())),
    }
}

impl Point {
    fn to_node(self) -> DetailNode {
        DetailNode::new("point")
            .with_attr("lat", self.lat.to_string())
            .with_attr("lon", self.lon.to_string())
            .with_attr("hae", self.hae.to_string())
            .with_attr("ce", self.ce.to_string())
            .with_attr("le", self.le.to_string())
    }

    fn from_node(node: &DetailNode) -> Result<Point, CodecError> {
        let metric = |key: &str, default: Option<f64>| -> Result<f64, CodecError> {
            match (node.attr(key), default) {
                (Some(raw), _) => raw
                    .trim()
                    .parse::<f64>()
                    .map_err(|e| CodecError::InvalidEvent(format!("point@{key}: {e}"))),
                (None, Some(value)) => Ok(value),
                (None, None) => Err(CodecError::InvalidEvent(format!("point@{key} missing"))),
            }
        };
        Ok(Point {
            lat: metric("lat", None)?,
            lon: metric("lon", None)?,
            hae: metric("hae", Some(UNKNOWN_METRIC))?,
            ce: metric("ce", Some(UNKNOWN_METRIC))?,
            le: metric("le", Some(UNKNOWN_METRIC))?,
        })
    }
}

impl CotEvent {
    /// Express this event as an `<event>` element tree.
    pub fn to_node(&self) -> DetailNode {
        DetailNode::new("event")
            .with_attr("version", "2.0")
            .with_attr("uid", self.uid.as_str())
            .with_attr("type", self.event_type.as_str())
            .with_attr("how", self.how.as_str())
            .with_attr("time", self.time.as_str())
            .with_attr("start", self.start.as_str())
            .with_attr("stale", self.stale.as_str())
            .with_child(self.point.to_node())
            .with_child(self.detail.clone())
    }

    /// Interpret an `<event>` element tree.
    pub fn from_node(node: &DetailNode) -> Result<CotEvent, CodecError> {
        if node.name != "event" {
            return Err(CodecError::InvalidEvent(format!(
                "root element is <{}>, expected <event>",
                node.name
            )));
        }
        let required = |key: &str| -> Result<String, CodecError> {
            node.attr(key)
                .map(str::to_string)
                .ok_or_else(|| CodecError::InvalidEvent(format!("event@{key} missing")))
        };

        let time = required("time")?;
        let point = match node.child("point") {
            Some(point) => Point::from_node(point)?,
            None => Point::unknown(),
        };
        Ok(CotEvent {
            uid: required("uid")?,
            event_type: required("type")?,
            how: node.attr("how").unwrap_or_default().to_string(),
            start: node.attr("start").unwrap_or(&time).to_string(),
            stale: node.attr("stale").unwrap_or(&time).to_string(),
            time,
            point,
            detail: node
                .child("detail")
                .cloned()
                .unwrap_or_else(|| DetailNode::new("detail")),
        })
    }

    /// Render as canonical CoT XML.
    pub fn to_xml(&self) -> String {
        self.to_node().to_xml()
    }

    /// Parse CoT XML.
    pub fn from_xml(xml: &str) -> Result<CotEvent, CodecError> {
        Self::from_node(&DetailNode::parse(xml)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> CotEvent {
        CotEvent::new("ANDROID-1", "a-f-G-U-C", "2024-01-01T00:00:00.000Z")
            .with_how("m-g")
            .with_point(Point::new(48.137, 11.575, 520.0, 4.9, 9999999.0))
            .with_detail(DetailNode::new("contact").with_attr("callsign", "ALPHA"))
            .with_detail(DetailNode::new("remarks").with_text("fuel < 20% & \"low\""))
    }

    #[test]
    fn render_is_compact() {
        let xml = sample_event().to_xml();
        assert!(xml.starts_with("<event version=\"2.0\" uid=\"ANDROID-1\""));
        assert!(!xml.contains("> <"));
        assert!(xml.contains("<contact callsign=\"ALPHA\"/>"));
    }

    #[test]
    fn event_survives_text_form() {
        let event = sample_event();
        let parsed = CotEvent::from_xml(&event.to_xml()).unwrap();
        assert_eq!(parsed, event);
        assert_eq!(parsed.to_xml(), event.to_xml());
    }

    #[test]
    fn parse_skips_declaration_and_whitespace() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<event version="2.0" uid="u1" type="a-h-G" how="h-e" time="T" start="T" stale="T">
    <point lat="1.5" lon="2.5" hae="0" ce="10" le="10"/>
    <detail>
        <remarks> keep inner spaces </remarks>
    </detail>
</event>"#;
        let event = CotEvent::from_xml(xml).unwrap();
        assert_eq!(event.uid, "u1");
        assert_eq!(event.point.lat, 1.5);
        assert_eq!(
            event.detail.child("remarks").and_then(|r| r.text.as_deref()),
            Some(" keep inner spaces ")
        );
    }

    #[test]
    fn missing_point_defaults_to_unknown() {
        let event = CotEvent::from_xml(r#"<event uid="u" type="t" time="T"/>"#).unwrap();
        assert_eq!(event.point, Point::unknown());
        assert_eq!(event.start, "T");
        assert!(event.detail.children.is_empty());
    }

    #[test]
    fn mismatched_tags_fail() {
        assert!(DetailNode::parse("<event><detail></event>").is_err());
    }

    #[test]
    fn unclosed_root_fails() {
        assert!(DetailNode::parse("<event><detail/>").is_err());
    }

    #[test]
    fn non_event_root_is_rejected() {
        let err = CotEvent::from_xml("<message/>").unwrap_err();
        assert!(matches!(err, CodecError::InvalidEvent(_)));
    }

    #[test]
    fn missing_uid_is_rejected() {
        assert!(CotEvent::from_xml(r#"<event type="t" time="T"/>"#).is_err());
    }
}
