use super::Dissector;
use crate::model::{
    Credential, DissectionError, Event, FieldValue, Frame, Protocol, Target, Vulnerability,
    VulnerabilityKind,
};
use crate::vuln::{credential_vulnerabilities, excerpt};
use std::collections::BTreeMap;

pub struct BinaryFrameDissector;

impl Dissector for BinaryFrameDissector {
    fn name(&self) -> &'static str {
        "binary_frame"
    }

    fn identify(&self, event: &Event) -> (bool, f32) {
        if event.protocol == Protocol::BinaryFramed {
            return (true, 0.9);
        }
        (false, 0.0)
    }

    fn dissect(&self, event: &Event) -> Result<Frame, DissectionError> {
        let bytes = &event.bytes;
        if bytes.len() < 2 {
            return Err(DissectionError {
                protocol: Protocol::BinaryFramed,
                reason: "frame shorter than minimum header".to_string(),
            });
        }
        let opcode = bytes[0] & 0x0F;
        let fin = bytes[0] & 0x80 != 0;
        let masked = bytes[1] & 0x80 != 0;
        let len_field = bytes[1] & 0x7F;

        let (payload_len, mut pos) = if len_field == 126 {
            if bytes.len() < 4 {
                return Err(DissectionError {
                    protocol: Protocol::BinaryFramed,
                    reason: "truncated 16-bit length extension".to_string(),
                });
            }
            (u16::from_be_bytes([bytes[2], bytes[3]]) as u64, 4usize)
        } else if len_field == 127 {
            if bytes.len() < 10 {
                return Err(DissectionError {
                    protocol: Protocol::BinaryFramed,
                    reason: "truncated 64-bit length extension".to_string(),
                });
            }
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[2..10]);
            (u64::from_be_bytes(buf), 10usize)
        } else {
            (len_field as u64, 2usize)
        };

        let mask_key = if masked {
            if bytes.len() < pos + 4 {
                return Err(DissectionError {
                    protocol: Protocol::BinaryFramed,
                    reason: "truncated mask key".to_string(),
                });
            }
            let key = [bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]];
            pos += 4;
            Some(key)
        } else {
            None
        };

        let end = pos + payload_len as usize;
        if bytes.len() < end {
            return Err(DissectionError {
                protocol: Protocol::BinaryFramed,
                reason: "payload shorter than declared length".to_string(),
            });
        }

        let mut payload = bytes[pos..end].to_vec();
        if let Some(key) = mask_key {
            for (i, b) in payload.iter_mut().enumerate() {
                *b ^= key[i % 4];
            }
        }

        let mut fields = BTreeMap::new();
        fields.insert("opcode".to_string(), FieldValue::Int(opcode as i64));
        fields.insert("fin".to_string(), FieldValue::Int(fin as i64));
        fields.insert("masked".to_string(), FieldValue::Int(masked as i64));
        fields.insert(
            "payload_len".to_string(),
            FieldValue::Int(payload_len as i64),
        );
        let is_text_opcode = opcode == 1;
        if is_text_opcode {
            if let Ok(s) = std::str::from_utf8(&payload) {
                fields.insert("payload".to_string(), FieldValue::Str(s.to_string()));
            } else {
                fields.insert("payload".to_string(), FieldValue::Bytes(payload.clone()));
            }
        } else {
            fields.insert("payload".to_string(), FieldValue::Bytes(payload.clone()));
        }

        Ok(Frame {
            protocol: Protocol::BinaryFramed,
            frame_type: opcode_name(opcode).to_string(),
            fields,
            raw: bytes.clone(),
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
        let mut vulns = credential_vulnerabilities(credentials, frame, target);

        let masked = matches!(frame.fields.get("masked"), Some(FieldValue::Int(1)));
        if frame.stream == crate::model::StreamKind::Input && !masked && !credentials.is_empty() {
            vulns.push(Vulnerability {
                id: Vulnerability::new_id(),
                timestamp: frame.timestamp,
                severity: crate::model::Severity::Medium,
                kind: VulnerabilityKind {
                    vuln_type: "protocol_weakness".to_string(),
                    subtype: "unmasked_client_frame".to_string(),
                },
                evidence: "client-to-server frame sent without the required mask bit".to_string(),
                stream: frame.stream,
                excerpt: excerpt(&frame.raw, 80),
                confidence: 0.6,
                target: target.clone(),
            });
        }
        vulns
    }
}

fn opcode_name(opcode: u8) -> &'static str {
    match opcode {
        0 => "continuation",
        1 => "text",
        2 => "binary",
        8 => "close",
        9 => "ping",
        10 => "pong",
        _ => "reserved",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StreamKind;

    fn event(bytes: Vec<u8>) -> Event {
        Event {
            bytes,
            protocol: Protocol::BinaryFramed,
            frame_type: String::new(),
            timestamp: chrono::Utc::now(),
            stream_offset: 0,
            stream: StreamKind::Output,
        }
    }

    #[test]
    fn unmasked_text_frame_decodes_payload() {
        let mut bytes = vec![0x81, 0x05];
        bytes.extend_from_slice(b"hello");
        let frame = BinaryFrameDissector.dissect(&event(bytes)).unwrap();
        assert_eq!(frame.field_str("payload"), Some("hello"));
        assert_eq!(frame.frame_type, "text");
    }

    #[test]
    fn masked_frame_unmasks_payload() {
        let key = [0x01, 0x02, 0x03, 0x04];
        let plain = b"hi!!";
        let mut bytes = vec![0x81, 0x84];
        bytes.extend_from_slice(&key);
        for (i, &b) in plain.iter().enumerate() {
            bytes.push(b ^ key[i % 4]);
        }
        let frame = BinaryFrameDissector.dissect(&event(bytes)).unwrap();
        assert_eq!(frame.field_str("payload"), Some("hi!!"));
    }
}
