use super::Dissector;
use crate::model::{Credential, DissectionError, Event, FieldValue, Frame, Protocol, Target, Vulnerability};
use crate::vuln::credential_vulnerabilities;
use std::collections::BTreeMap;

/// Catch-all dissector: identifies everything at low confidence (spec
/// §4.4: "a catch-all plain-text dissector with identification confidence
/// of 0.1 so that any unmatched byte slice still reaches the credential
/// scanner") and never fails to dissect — any bytes become a one-field
/// Frame.
pub struct PlainTextDissector;

const IDENTIFY_CONFIDENCE: f32 = 0.1;

impl Dissector for PlainTextDissector {
    fn name(&self) -> &'static str {
        "plaintext"
    }

    fn identify(&self, _event: &Event) -> (bool, f32) {
        (true, IDENTIFY_CONFIDENCE)
    }

    fn dissect(&self, event: &Event) -> Result<Frame, DissectionError> {
        let mut fields = BTreeMap::new();
        match std::str::from_utf8(&event.bytes) {
            Ok(s) => {
                fields.insert("text".to_string(), FieldValue::Str(s.to_string()));
            }
            Err(_) => {
                fields.insert("bytes".to_string(), FieldValue::Bytes(event.bytes.clone()));
            }
        }

        Ok(Frame {
            protocol: Protocol::PlainText,
            frame_type: "line".to_string(),
            fields,
            raw: event.bytes.clone(),
            stream: event.stream,
            timestamp: event.timestamp,
            session_id: None,
        })
    }

    fn find_vulnerabilities(
        &self,
        frame: &Frame,
        credentials: &[Credential],
        target: &Target,
    ) -> Vec<Vulnerability> {
        credential_vulnerabilities(credentials, frame, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StreamKind;

    fn event(bytes: &[u8]) -> Event {
        Event {
            bytes: bytes.to_vec(),
            protocol: Protocol::PlainText,
            frame_type: String::new(),
            timestamp: chrono::Utc::now(),
            stream_offset: 0,
            stream: StreamKind::Output,
        }
    }

    #[test]
    fn identifies_anything_at_low_confidence() {
        let (matches, confidence) = PlainTextDissector.identify(&event(b"arbitrary bytes"));
        assert!(matches);
        assert_eq!(confidence, 0.1);
    }

    #[test]
    fn dissects_non_utf8_bytes_without_panicking() {
        let frame = PlainTextDissector
            .dissect(&event(&[0xFF, 0xFE, 0x00, 0x01]))
            .unwrap();
        assert!(frame.fields.contains_key("bytes"));
    }

    #[test]
    fn dissects_text_into_text_field() {
        let frame = PlainTextDissector.dissect(&event(b"hello\n")).unwrap();
        assert_eq!(frame.field_str("text"), Some("hello\n"));
    }
}
