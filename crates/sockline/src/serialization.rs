//! XML conversion for object payloads.
//!
//! Objects travel as self-describing XML documents produced by `quick-xml`'s
//! serde support. The root element names the type and doubles as the frame
//! header, so a receiver can tell what it got before choosing a target type.
//!
//! ```ignore
//! use serde::{Deserialize, Serialize};
//! use sockline::serialization::{from_xml, to_xml};
//!
//! #[derive(Serialize, Deserialize)]
//! #[serde(rename_all = "PascalCase")]
//! struct Record {
//!     name: String,
//!     value: i32,
//! }
//!
//! let doc = to_xml(&Record { name: "a".into(), value: 1 })?;
//! assert_eq!(doc.root, "Record");
//! let back: Record = from_xml(&doc.xml)?;
//! ```

use quick_xml::Reader;
use quick_xml::events::Event;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sockline_core::PerfSpan;

use crate::error::SerializationError;

/// A serialized object: its root element name and the full document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XmlPayload {
    /// Root element name, used as the frame header.
    pub root: String,
    /// XML document text.
    pub xml: String,
}

/// Serialize `value` to an XML document.
pub fn to_xml<T: Serialize + ?Sized>(value: &T) -> Result<XmlPayload, SerializationError> {
    let _perf = PerfSpan::new("to_xml");
    let xml = quick_xml::se::to_string(value).map_err(|e| SerializationError::Serialize {
        type_name: std::any::type_name::<T>().to_string(),
        message: e.to_string(),
    })?;
    let root = root_element(&xml)?;
    Ok(XmlPayload { root, xml })
}

/// Deserialize an XML document into `T`.
pub fn from_xml<T: DeserializeOwned>(xml: &str) -> Result<T, SerializationError> {
    quick_xml::de::from_str(xml).map_err(|e| SerializationError::Deserialize {
        expected: std::any::type_name::<T>().to_string(),
        message: e.to_string(),
    })
}

/// Check that an inbound object payload is a UTF-8, well-formed XML document.
///
/// Returns the document text on success.
pub fn validate_payload(payload: &[u8]) -> Result<&str, SerializationError> {
    let xml = std::str::from_utf8(payload).map_err(|_| SerializationError::InvalidEncoding)?;
    root_element(xml)?;
    Ok(xml)
}

/// Walk the document once and return the root element name.
///
/// Fails unless there is exactly one root element and every element is closed.
fn root_element(xml: &str) -> Result<String, SerializationError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().check_end_names = true;

    let mut root: Option<String> = None;
    let mut depth: usize = 0;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| SerializationError::Malformed(e.to_string()))?;
        match event {
            Event::Start(start) => {
                if depth == 0 {
                    if root.is_some() {
                        return Err(SerializationError::Malformed(
                            "multiple root elements".into(),
                        ));
                    }
                    root = Some(String::from_utf8_lossy(start.name().as_ref()).into_owned());
                }
                depth += 1;
            }
            Event::Empty(empty) => {
                if depth == 0 {
                    if root.is_some() {
                        return Err(SerializationError::Malformed(
                            "multiple root elements".into(),
                        ));
                    }
                    root = Some(String::from_utf8_lossy(empty.name().as_ref()).into_owned());
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
            }
            Event::Text(text) if depth == 0 => {
                if !text.iter().all(u8::is_ascii_whitespace) {
                    return Err(SerializationError::Malformed(
                        "text outside the root element".into(),
                    ));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if depth != 0 {
        return Err(SerializationError::Malformed("unclosed element".into()));
    }
    root.ok_or_else(|| SerializationError::Malformed("document has no root element".into()))
}
