use super::Dissector;
use crate::model::{
    Credential, DissectionError, Event, FieldValue, Frame, Protocol, Target, Vulnerability,
};
use crate::vuln::credential_vulnerabilities;
use std::collections::BTreeMap;

pub struct HttpDissector;

const METHODS: &[&str] = &[
    "GET ", "POST ", "PUT ", "DELETE ", "HEAD ", "OPTIONS ", "PATCH ", "CONNECT ", "TRACE ",
];

impl Dissector for HttpDissector {
    fn name(&self) -> &'static str {
        "http"
    }

    fn identify(&self, event: &Event) -> (bool, f32) {
        if event.protocol == Protocol::Http {
            return (true, 0.95);
        }
        let starts_like_request = METHODS.iter().any(|m| event.bytes.starts_with(m.as_bytes()));
        let starts_like_response = event.bytes.starts_with(b"HTTP/");
        (starts_like_request || starts_like_response, 0.6)
    }

    fn dissect(&self, event: &Event) -> Result<Frame, DissectionError> {
        let text = std::str::from_utf8(&event.bytes).map_err(|e| DissectionError {
            protocol: Protocol::Http,
            reason: format!("non-utf8 http message: {e}"),
        })?;

        let header_end = find(text.as_bytes(), b"\r\n\r\n")
            .map(|p| p + 4)
            .or_else(|| find(text.as_bytes(), b"\n\n").map(|p| p + 2))
            .ok_or_else(|| DissectionError {
                protocol: Protocol::Http,
                reason: "no header terminator found".to_string(),
            })?;

        let header_block = &text[..header_end];
        let mut lines = header_block.split("\r\n").flat_map(|l| l.split('\n'));
        let start_line = lines.next().ok_or_else(|| DissectionError {
            protocol: Protocol::Http,
            reason: "empty message".to_string(),
        })?;

        let mut fields = BTreeMap::new();
        let frame_type;

        let is_request = METHODS.iter().any(|m| start_line.starts_with(m.trim_end()));
        if is_request {
            let mut parts = start_line.split_whitespace();
            let method = parts.next().unwrap_or_default();
            let path = parts.next().unwrap_or_default();
            let version = parts.next().unwrap_or_default();
            fields.insert("method".to_string(), FieldValue::Str(method.to_string()));
            fields.insert("path".to_string(), FieldValue::Str(path.to_string()));
            fields.insert("version".to_string(), FieldValue::Str(version.to_string()));
            frame_type = "request".to_string();
        } else if start_line.starts_with("HTTP/") {
            let mut parts = start_line.splitn(3, ' ');
            let version = parts.next().unwrap_or_default();
            let status = parts.next().unwrap_or_default();
            let reason = parts.next().unwrap_or_default();
            fields.insert("version".to_string(), FieldValue::Str(version.to_string()));
            fields.insert("status".to_string(), FieldValue::Str(status.to_string()));
            fields.insert("reason".to_string(), FieldValue::Str(reason.to_string()));
            frame_type = "response".to_string();
        } else {
            return Err(DissectionError {
                protocol: Protocol::Http,
                reason: format!("unrecognized start line: {start_line}"),
            });
        }

        let mut headers = BTreeMap::new();
        for line in header_block[start_line.len()..]
            .split("\r\n")
            .flat_map(|l| l.split('\n'))
        {
            if let Some((k, v)) = line.split_once(':') {
                headers.insert(
                    k.trim().to_ascii_lowercase(),
                    FieldValue::Str(v.trim().to_string()),
                );
            }
        }
        fields.insert("headers".to_string(), FieldValue::Map(headers.clone()));

        let body = &text[header_end.min(text.len())..];
        if !body.is_empty() {
            fields.insert("body".to_string(), FieldValue::Str(body.to_string()));
        }

        Ok(Frame {
            protocol: Protocol::Http,
            frame_type,
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
        if let Some(FieldValue::Map(headers)) = frame.fields.get("headers") {
            if let Some(FieldValue::Str(cookie)) = headers.get("cookie") {
                for part in cookie.split(';') {
                    if let Some((k, v)) = part.trim().split_once('=') {
                        if k.eq_ignore_ascii_case("session") || k.eq_ignore_ascii_case("sessionid")
                        {
                            return Some(v.to_string());
                        }
                    }
                }
            }
            if let Some(FieldValue::Str(id)) = headers.get("x-session-id") {
                return Some(id.clone());
            }
        }
        None
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StreamKind;
    use crate::scanner::CredentialScanner;

    fn event(bytes: &[u8]) -> Event {
        Event {
            bytes: bytes.to_vec(),
            protocol: Protocol::Http,
            frame_type: String::new(),
            timestamp: chrono::Utc::now(),
            stream_offset: 0,
            stream: StreamKind::Output,
        }
    }

    #[test]
    fn post_with_password_body_yields_critical_exposure() {
        let msg = b"POST /login HTTP/1.1\r\nHost: x\r\nContent-Length: 23\r\n\r\n{\"password\":\"hunter2\"}";
        let e = event(msg);
        let d = HttpDissector;
        let frame = d.dissect(&e).expect("should dissect");
        assert_eq!(frame.frame_type, "request");
        assert_eq!(frame.field_str("method"), Some("POST"));
        assert_eq!(frame.field_str("path"), Some("/login"));

        let scanner = CredentialScanner::new();
        let text = std::str::from_utf8(&frame.raw).unwrap();
        let creds = scanner.hunt(text);
        let target = Target::new(1, "test".to_string());
        let vulns = d.find_vulnerabilities(&frame, &creds, &target);
        assert!(vulns
            .iter()
            .any(|v| v.kind.vuln_type == "credential_exposure" && v.kind.subtype == "password"));
        assert!(vulns.iter().any(|v| v.severity == crate::model::Severity::Critical));
    }

    #[test]
    fn response_start_line_parsed() {
        let msg = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
        let frame = HttpDissector.dissect(&event(msg)).unwrap();
        assert_eq!(frame.frame_type, "response");
        assert_eq!(frame.field_str("status"), Some("200"));
    }

    #[test]
    fn session_cookie_extracted() {
        let msg = b"GET / HTTP/1.1\r\nHost: x\r\nCookie: session=abc123\r\n\r\n";
        let frame = HttpDissector.dissect(&event(msg)).unwrap();
        assert_eq!(
            HttpDissector.extract_session_id(&frame),
            Some("abc123".to_string())
        );
    }
}
