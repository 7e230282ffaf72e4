//! Strict pull parser for RRDP documents.
//!
//! Built on the `quick_xml` event reader. Namespaces are ignored (matching is
//! done on local names), comments and processing instructions are skipped,
//! and any element the RRDP schema does not allow at a given position is an
//! error.

use crate::document::{
    DeltaDoc, DeltaRefDoc, DocHeader, NotificationDoc, PublishElement, SnapshotDoc,
    SnapshotRefDoc, WithdrawElement,
};
use crate::encoding::decode_payload;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;

type Attrs = HashMap<String, String>;

enum Node {
    Open { name: String, attrs: Attrs, empty: bool },
    Close(String),
    Text(String),
}

struct Cursor<'a> {
    reader: Reader<&'a [u8]>,
}

impl<'a> Cursor<'a> {
    fn new(xml: &'a [u8]) -> Self {
        Self {
            reader: Reader::from_reader(xml),
        }
    }

    fn next(&mut self) -> Result<Option<Node>, ParseError> {
        loop {
            let event = match self.reader.read_event() {
                Ok(event) => event,
                Err(e) => {
                    return Err(ParseError::Xml {
                        position: self.reader.buffer_position(),
                        message: e.to_string(),
                    })
                }
            };

            let node = match event {
                Event::Start(e) => Node::Open {
                    name: local_name(&e),
                    attrs: attributes(&e)?,
                    empty: false,
                },
                Event::Empty(e) => Node::Open {
                    name: local_name(&e),
                    attrs: attributes(&e)?,
                    empty: true,
                },
                Event::End(e) => Node::Close(String::from_utf8_lossy(e.local_name().as_ref()).into_owned()),
                Event::Text(t) => {
                    let text = t.unescape().map_err(|e| ParseError::Xml {
                        position: self.reader.buffer_position(),
                        message: e.to_string(),
                    })?;
                    Node::Text(text.into_owned())
                }
                Event::CData(c) => Node::Text(String::from_utf8_lossy(&c.into_inner()).into_owned()),
                Event::Eof => return Ok(None),
                _ => continue,
            };
            return Ok(Some(node));
        }
    }

    /// Advance to the root element, which must be named `expected`.
    fn open_root(&mut self, expected: &'static str) -> Result<(Attrs, bool), ParseError> {
        loop {
            match self.next()? {
                Some(Node::Open { name, attrs, empty }) => {
                    if name == expected {
                        return Ok((attrs, empty));
                    }
                    return Err(ParseError::UnexpectedRoot {
                        expected,
                        found: name,
                    });
                }
                Some(Node::Text(text)) if text.trim().is_empty() => {}
                Some(Node::Text(_) | Node::Close(_)) => {
                    return Err(ParseError::UnexpectedText {
                        element: expected.to_string(),
                    })
                }
                None => {
                    return Err(ParseError::UnexpectedEof {
                        element: expected.to_string(),
                    })
                }
            }
        }
    }

    /// Next child element of `parent`, or `None` once `parent` is closed.
    fn next_child(&mut self, parent: &str) -> Result<Option<(String, Attrs, bool)>, ParseError> {
        loop {
            match self.next()? {
                Some(Node::Open { name, attrs, empty }) => return Ok(Some((name, attrs, empty))),
                Some(Node::Close(name)) if name == parent => return Ok(None),
                Some(Node::Close(name)) => {
                    return Err(ParseError::UnexpectedElement {
                        parent: parent.to_string(),
                        found: format!("/{name}"),
                    })
                }
                Some(Node::Text(text)) if text.trim().is_empty() => {}
                Some(Node::Text(_)) => {
                    return Err(ParseError::UnexpectedText {
                        element: parent.to_string(),
                    })
                }
                None => {
                    return Err(ParseError::UnexpectedEof {
                        element: parent.to_string(),
                    })
                }
            }
        }
    }

    /// Collect the text content of `element` up to its closing tag.
    fn text_body(&mut self, element: &str, empty: bool) -> Result<String, ParseError> {
        let mut text = String::new();
        if empty {
            return Ok(text);
        }
        loop {
            match self.next()? {
                Some(Node::Text(chunk)) => text.push_str(&chunk),
                Some(Node::Close(name)) if name == element => return Ok(text),
                Some(Node::Open { name, .. }) => {
                    return Err(ParseError::UnexpectedElement {
                        parent: element.to_string(),
                        found: name,
                    })
                }
                Some(Node::Close(name)) => {
                    return Err(ParseError::UnexpectedElement {
                        parent: element.to_string(),
                        found: format!("/{name}"),
                    })
                }
                None => {
                    return Err(ParseError::UnexpectedEof {
                        element: element.to_string(),
                    })
                }
            }
        }
    }

    /// Consume an element that must not carry text content.
    fn empty_body(&mut self, element: &str, empty: bool) -> Result<(), ParseError> {
        if self.text_body(element, empty)?.trim().is_empty() {
            Ok(())
        } else {
            Err(ParseError::UnexpectedText {
                element: element.to_string(),
            })
        }
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attributes(e: &BytesStart<'_>) -> Result<Attrs, ParseError> {
    let mut attrs = Attrs::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| ParseError::Attribute(err.to_string()))?;
        let raw_key = attr.key.as_ref();
        if raw_key == b"xmlns" || raw_key.starts_with(b"xmlns:") {
            continue;
        }
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| ParseError::Attribute(err.to_string()))?;
        attrs.insert(key, value.into_owned());
    }
    Ok(attrs)
}

fn required<'m>(
    element: &str,
    attrs: &'m Attrs,
    attribute: &'static str,
) -> Result<&'m str, ParseError> {
    attrs
        .get(attribute)
        .map(String::as_str)
        .ok_or_else(|| ParseError::MissingAttribute {
            element: element.to_string(),
            attribute,
        })
}

fn parse_serial(element: &str, value: &str) -> Result<u64, ParseError> {
    value
        .trim()
        .parse()
        .map_err(|_| ParseError::InvalidSerial {
            element: element.to_string(),
            value: value.to_string(),
        })
}

/// Version and session id default to empty so that the protocol layer can
/// report them as unsupported or missing; a serial is always required.
fn header(element: &str, attrs: &Attrs) -> Result<DocHeader, ParseError> {
    Ok(DocHeader {
        version: attrs.get("version").cloned().unwrap_or_default(),
        session_id: attrs.get("session_id").cloned().unwrap_or_default(),
        serial: parse_serial(element, required(element, attrs, "serial")?)?,
    })
}

fn publish(cursor: &mut Cursor<'_>, attrs: &Attrs, empty: bool) -> Result<PublishElement, ParseError> {
    let uri = required("publish", attrs, "uri")?.to_string();
    let text = cursor.text_body("publish", empty)?;
    let payload = decode_payload(&text).map_err(|e| ParseError::Payload {
        uri: uri.clone(),
        message: e.to_string(),
    })?;

    Ok(PublishElement {
        uri,
        hash: attrs.get("hash").cloned(),
        payload,
    })
}

/// Parse a `<notification>` document.
///
/// # Errors
///
/// Returns error if the bytes are not well-formed XML or do not have the
/// notification shape (exactly one `<snapshot>`, any number of `<delta>`).
pub fn parse_notification(xml: &[u8]) -> Result<NotificationDoc, ParseError> {
    let mut cursor = Cursor::new(xml);
    let (attrs, empty) = cursor.open_root("notification")?;
    let header = header("notification", &attrs)?;

    let mut snapshot = None;
    let mut deltas = Vec::new();

    if !empty {
        while let Some((name, attrs, empty)) = cursor.next_child("notification")? {
            match name.as_str() {
                "snapshot" => {
                    if snapshot.is_some() {
                        return Err(ParseError::DuplicateElement {
                            parent: "notification".to_string(),
                            element: name,
                        });
                    }
                    snapshot = Some(SnapshotRefDoc {
                        uri: required("snapshot", &attrs, "uri")?.to_string(),
                        hash: required("snapshot", &attrs, "hash")?.to_string(),
                    });
                    cursor.empty_body("snapshot", empty)?;
                }
                "delta" => {
                    deltas.push(DeltaRefDoc {
                        serial: parse_serial("delta", required("delta", &attrs, "serial")?)?,
                        uri: required("delta", &attrs, "uri")?.to_string(),
                        hash: required("delta", &attrs, "hash")?.to_string(),
                    });
                    cursor.empty_body("delta", empty)?;
                }
                _ => {
                    return Err(ParseError::UnexpectedElement {
                        parent: "notification".to_string(),
                        found: name,
                    })
                }
            }
        }
    }

    let snapshot = snapshot.ok_or_else(|| ParseError::MissingElement {
        parent: "notification".to_string(),
        element: "snapshot",
    })?;

    Ok(NotificationDoc {
        header,
        snapshot,
        deltas,
    })
}

/// Parse a `<snapshot>` document.
///
/// # Errors
///
/// Returns error on malformed XML, unexpected elements, or a publish payload
/// that is not valid base64.
pub fn parse_snapshot(xml: &[u8]) -> Result<SnapshotDoc, ParseError> {
    let mut cursor = Cursor::new(xml);
    let (attrs, empty) = cursor.open_root("snapshot")?;
    let header = header("snapshot", &attrs)?;

    let mut publishes = Vec::new();
    if !empty {
        while let Some((name, attrs, empty)) = cursor.next_child("snapshot")? {
            if name != "publish" {
                return Err(ParseError::UnexpectedElement {
                    parent: "snapshot".to_string(),
                    found: name,
                });
            }
            publishes.push(publish(&mut cursor, &attrs, empty)?);
        }
    }

    Ok(SnapshotDoc { header, publishes })
}

/// Parse a `<delta>` document.
///
/// # Errors
///
/// Returns error on malformed XML, unexpected elements, or a publish payload
/// that is not valid base64.
pub fn parse_delta(xml: &[u8]) -> Result<DeltaDoc, ParseError> {
    let mut cursor = Cursor::new(xml);
    let (attrs, empty) = cursor.open_root("delta")?;
    let header = header("delta", &attrs)?;

    let mut publishes = Vec::new();
    let mut withdraws = Vec::new();
    if !empty {
        while let Some((name, attrs, empty)) = cursor.next_child("delta")? {
            match name.as_str() {
                "publish" => publishes.push(publish(&mut cursor, &attrs, empty)?),
                "withdraw" => {
                    withdraws.push(WithdrawElement {
                        uri: required("withdraw", &attrs, "uri")?.to_string(),
                        hash: attrs.get("hash").cloned(),
                    });
                    cursor.empty_body("withdraw", empty)?;
                }
                _ => {
                    return Err(ParseError::UnexpectedElement {
                        parent: "delta".to_string(),
                        found: name,
                    })
                }
            }
        }
    }

    Ok(DeltaDoc {
        header,
        publishes,
        withdraws,
    })
}

/// Errors that can occur while parsing an RRDP document.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    /// The bytes are not well-formed XML
    #[error("XML error at byte {position}: {message}")]
    Xml {
        /// Reader position when the error was detected
        position: usize,
        /// Underlying reader error
        message: String,
    },
    /// An attribute could not be read or unescaped
    #[error("attribute error: {0}")]
    Attribute(String),
    /// The document root has the wrong name
    #[error("expected <{expected}> root element, found <{found}>")]
    UnexpectedRoot {
        /// Root element required by the caller
        expected: &'static str,
        /// Root element present in the document
        found: String,
    },
    /// An element is not allowed at this position
    #[error("unexpected <{found}> inside <{parent}>")]
    UnexpectedElement {
        /// Enclosing element
        parent: String,
        /// Offending element
        found: String,
    },
    /// Non-whitespace text where none is allowed
    #[error("unexpected text content in <{element}>")]
    UnexpectedText {
        /// Element holding the text
        element: String,
    },
    /// Input ended before an element was closed
    #[error("unexpected end of document inside <{element}>")]
    UnexpectedEof {
        /// Element left open
        element: String,
    },
    /// A required child element is absent
    #[error("<{parent}> is missing its <{element}> element")]
    MissingElement {
        /// Enclosing element
        parent: String,
        /// Missing element
        element: &'static str,
    },
    /// A child element that may appear once appears twice
    #[error("<{parent}> has more than one <{element}> element")]
    DuplicateElement {
        /// Enclosing element
        parent: String,
        /// Repeated element
        element: String,
    },
    /// A required attribute is absent
    #[error("<{element}> is missing the '{attribute}' attribute")]
    MissingAttribute {
        /// Element lacking the attribute
        element: String,
        /// Missing attribute name
        attribute: &'static str,
    },
    /// A serial attribute is not an unsigned integer
    #[error("<{element}> has invalid serial '{value}'")]
    InvalidSerial {
        /// Element carrying the serial
        element: String,
        /// Raw attribute value
        value: String,
    },
    /// A publish payload is not valid base64
    #[error("invalid payload for {uri}: {message}")]
    Payload {
        /// URI of the publish element
        uri: String,
        /// Decoder error
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::encode_payload;

    const NOTIFICATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<notification xmlns="http://www.ripe.net/rpki/rrdp" version="1"
    session_id="9df4b597-af9e-4dca-bdda-719cce2c4e28" serial="3">
  <snapshot uri="https://host/9d-8/3/snapshot.xml"
      hash="EEEA7F7AD96D85BBD1F7274FA7DA0025984A2AF3D5A0538F77BEC732ECB1B068"/>
  <delta serial="3" uri="https://host/9d-8/3/delta.xml"
      hash="0AA5BA0A1B1A2E3B9AB0F5D2DF0DD11A6E4C8B8C9A5C1E2DEA3C2D61A5F6D8A1"/>
  <delta serial="2" uri="https://host/9d-8/2/delta.xml"
      hash="2B5F7F5D1E1B2C3D4E5F60718293A4B5C6D7E8F90A1B2C3D4E5F60718293A4B5"/>
</notification>"#;

    #[test]
    fn notification_basic() {
        let doc = parse_notification(NOTIFICATION.as_bytes()).unwrap();

        assert_eq!(doc.header.version, "1");
        assert_eq!(doc.header.session_id, "9df4b597-af9e-4dca-bdda-719cce2c4e28");
        assert_eq!(doc.header.serial, 3);
        assert_eq!(doc.snapshot.uri, "https://host/9d-8/3/snapshot.xml");
        // Document order is kept; sorting is the client's job
        let serials: Vec<u64> = doc.deltas.iter().map(|d| d.serial).collect();
        assert_eq!(serials, vec![3, 2]);
    }

    #[test]
    fn notification_without_snapshot_fails() {
        let xml = r#"<notification version="1" session_id="s" serial="1"></notification>"#;
        let err = parse_notification(xml.as_bytes()).unwrap_err();
        assert!(matches!(err, ParseError::MissingElement { element: "snapshot", .. }));
    }

    #[test]
    fn notification_with_two_snapshots_fails() {
        let xml = r#"<notification version="1" session_id="s" serial="1">
            <snapshot uri="a" hash="00"/><snapshot uri="b" hash="00"/>
        </notification>"#;
        let err = parse_notification(xml.as_bytes()).unwrap_err();
        assert!(matches!(err, ParseError::DuplicateElement { .. }));
    }

    #[test]
    fn missing_session_id_parses_as_empty() {
        let xml = r#"<notification version="1" serial="1"><snapshot uri="a" hash="00"/></notification>"#;
        let doc = parse_notification(xml.as_bytes()).unwrap();
        assert!(doc.header.session_id.is_empty());
    }

    #[test]
    fn invalid_serial_rejected() {
        let xml = r#"<notification version="1" session_id="s" serial="-4">
            <snapshot uri="a" hash="00"/></notification>"#;
        let err = parse_notification(xml.as_bytes()).unwrap_err();
        assert!(matches!(err, ParseError::InvalidSerial { .. }));
    }

    #[test]
    fn wrong_root_rejected() {
        let xml = r#"<snapshot version="1" session_id="s" serial="1"/>"#;
        let err = parse_delta(xml.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            ParseError::UnexpectedRoot {
                expected: "delta",
                ..
            }
        ));
    }

    #[test]
    fn snapshot_with_wrapped_payloads() {
        let body = encode_payload(b"certificate bytes");
        let (head, tail) = body.split_at(8);
        let xml = format!(
            r#"<snapshot xmlns="http://www.ripe.net/rpki/rrdp" version="1" session_id="s" serial="7">
  <publish uri="rsync://host/repo/a.cer">
    {head}
    {tail}
  </publish>
  <publish uri="rsync://host/repo/empty.crl"/>
</snapshot>"#
        );

        let doc = parse_snapshot(xml.as_bytes()).unwrap();
        assert_eq!(doc.header.serial, 7);
        assert_eq!(doc.publishes.len(), 2);
        assert_eq!(doc.publishes[0].payload, b"certificate bytes");
        assert!(doc.publishes[0].hash.is_none());
        assert!(doc.publishes[1].payload.is_empty());
    }

    #[test]
    fn delta_publish_and_withdraw() {
        let xml = format!(
            r#"<delta version="1" session_id="s" serial="4">
  <publish uri="rsync://host/repo/a.mft" hash="ab12">{}</publish>
  <withdraw uri="rsync://host/repo/b.roa" hash="cd34"/>
</delta>"#,
            encode_payload(b"manifest")
        );

        let doc = parse_delta(xml.as_bytes()).unwrap();
        assert_eq!(doc.publishes.len(), 1);
        assert_eq!(doc.publishes[0].hash.as_deref(), Some("ab12"));
        assert_eq!(doc.withdraws.len(), 1);
        assert_eq!(doc.withdraws[0].uri, "rsync://host/repo/b.roa");
        assert_eq!(doc.withdraws[0].hash.as_deref(), Some("cd34"));
    }

    #[test]
    fn escaped_uri_is_unescaped() {
        let xml = r#"<delta version="1" session_id="s" serial="4">
            <withdraw uri="rsync://host/a&amp;b.roa" hash="00"/></delta>"#;
        let doc = parse_delta(xml.as_bytes()).unwrap();
        assert_eq!(doc.withdraws[0].uri, "rsync://host/a&b.roa");
    }

    #[test]
    fn unknown_child_rejected() {
        let xml = r#"<delta version="1" session_id="s" serial="4"><replace uri="x"/></delta>"#;
        let err = parse_delta(xml.as_bytes()).unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedElement { .. }));
    }

    #[test]
    fn bad_payload_reports_uri() {
        let xml = r#"<snapshot version="1" session_id="s" serial="1">
            <publish uri="rsync://host/x.cer">@@@</publish></snapshot>"#;
        let err = parse_snapshot(xml.as_bytes()).unwrap_err();
        match err {
            ParseError::Payload { uri, .. } => assert_eq!(uri, "rsync://host/x.cer"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn truncated_document_rejected() {
        let xml = r#"<snapshot version="1" session_id="s" serial="1"><publish uri="a">"#;
        assert!(parse_snapshot(xml.as_bytes()).is_err());
    }
}
