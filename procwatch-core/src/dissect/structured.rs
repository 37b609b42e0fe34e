use super::Dissector;
use crate::model::{
    Credential, DissectionError, Event, FieldValue, Frame, Protocol, Target, Vulnerability,
};
use crate::vuln::credential_vulnerabilities;
use std::collections::BTreeMap;

pub struct StructuredDissector;

impl Dissector for StructuredDissector {
    fn name(&self) -> &'static str {
        "structured"
    }

    fn identify(&self, event: &Event) -> (bool, f32) {
        if event.protocol == Protocol::Structured {
            return (true, 0.85);
        }
        let trimmed = event.bytes.iter().find(|&&b| !b.is_ascii_whitespace());
        let looks_structured = matches!(trimmed, Some(b'{') | Some(b'['));
        (looks_structured, 0.3)
    }

    fn dissect(&self, event: &Event) -> Result<Frame, DissectionError> {
        let value: serde_json::Value =
            serde_json::from_slice(&event.bytes).map_err(|e| DissectionError {
                protocol: Protocol::Structured,
                reason: format!("not valid structured data: {e}"),
            })?;

        let mut fields = BTreeMap::new();
        flatten("", &value, &mut fields);

        Ok(Frame {
            protocol: Protocol::Structured,
            frame_type: "object".to_string(),
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

    fn extract_session_id(&self, frame: &Frame) -> Option<String> {
        for key in ["session_id", "sessionId", "session", "sid"] {
            if let Some(s) = frame.field_str(key) {
                return Some(s.to_string());
            }
        }
        None
    }
}

/// Flattens a `serde_json::Value` into dotted-path field names (`a.b[3].c`)
/// for the credential scanner's benefit, and also keeps a structured
/// `FieldValue` tree at the top level for consumers that want the nested
/// shape.
fn flatten(prefix: &str, value: &serde_json::Value, out: &mut BTreeMap<String, FieldValue>) {
    match value {
        serde_json::Value::Object(map) => {
            if prefix.is_empty() {
                out.insert(
                    "__root".to_string(),
                    FieldValue::Map(to_field_value_map(map)),
                );
            }
            for (k, v) in map {
                let path = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten(&path, v, out);
            }
        }
        serde_json::Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                let path = format!("{prefix}[{i}]");
                flatten(&path, item, out);
            }
        }
        serde_json::Value::String(s) => {
            out.insert(prefix.to_string(), FieldValue::Str(s.clone()));
        }
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.insert(prefix.to_string(), FieldValue::Int(i));
            } else {
                out.insert(prefix.to_string(), FieldValue::Str(n.to_string()));
            }
        }
        serde_json::Value::Bool(b) => {
            out.insert(prefix.to_string(), FieldValue::Int(*b as i64));
        }
        serde_json::Value::Null => {
            out.insert(prefix.to_string(), FieldValue::Str(String::new()));
        }
    }
}

fn to_field_value_map(
    map: &serde_json::Map<String, serde_json::Value>,
) -> BTreeMap<String, FieldValue> {
    let mut out = BTreeMap::new();
    for (k, v) in map {
        let mut leaf = BTreeMap::new();
        flatten("", v, &mut leaf);
        if let Some(only) = leaf.remove("") {
            out.insert(k.clone(), only);
        } else if leaf.len() == 1 {
            out.insert(k.clone(), leaf.into_values().next().unwrap());
        } else {
            out.insert(k.clone(), FieldValue::Map(leaf));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StreamKind;

    fn event(bytes: &[u8]) -> Event {
        Event {
            bytes: bytes.to_vec(),
            protocol: Protocol::Structured,
            frame_type: String::new(),
            timestamp: chrono::Utc::now(),
            stream_offset: 0,
            stream: StreamKind::Output,
        }
    }

    #[test]
    fn nested_array_flattens_to_dotted_path() {
        let frame = StructuredDissector
            .dissect(&event(br#"{"a":{"b":[1,2,{"c":3}]}}"#))
            .unwrap();
        assert_eq!(frame.field_str("a.b[2].c"), None);
        match frame.fields.get("a.b[2].c") {
            Some(FieldValue::Int(3)) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn session_id_extracted_from_top_level_field() {
        let frame = StructuredDissector
            .dissect(&event(br#"{"session_id":"abc","msg":"hi"}"#))
            .unwrap();
        assert_eq!(
            StructuredDissector.extract_session_id(&frame),
            Some("abc".to_string())
        );
    }

    #[test]
    fn malformed_json_is_dissection_error_not_panic() {
        let result = StructuredDissector.dissect(&event(b"{not json"));
        assert!(result.is_err());
    }
}
