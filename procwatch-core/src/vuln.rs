//! Combines dissected fields and credential findings into `Vulnerability`
//! findings. There is no separate `VulnDetector` type in this
//! implementation — each `Dissector::find_vulnerabilities` *is* the
//! protocol-specific vuln detector — but the bridge from "a credential
//! was found in this frame" to "emit a `credential_exposure`
//! vulnerability" is identical across every protocol, so it lives here
//! as a shared helper every dissector calls into, plus the cross-frame
//! `Session` checks.

use crate::model::{
    Credential, CredentialClass, Frame, Session, Severity, StreamKind, Target, Vulnerability,
    VulnerabilityKind,
};

/// Turns each credential finding for this frame into a `credential_exposure`
/// vulnerability. Called by every dissector's `find_vulnerabilities` as the
/// protocol-agnostic baseline before any protocol-specific checks.
pub fn credential_vulnerabilities(
    credentials: &[Credential],
    frame: &Frame,
    target: &Target,
) -> Vec<Vulnerability> {
    credentials
        .iter()
        .map(|cred| Vulnerability {
            id: Vulnerability::new_id(),
            timestamp: frame.timestamp,
            severity: cred.severity,
            kind: VulnerabilityKind {
                vuln_type: "credential_exposure".to_string(),
                subtype: credential_subtype(cred.class).to_string(),
            },
            evidence: cred.redacted.clone(),
            stream: frame.stream,
            excerpt: excerpt(&frame.raw, 120),
            confidence: cred.confidence,
            target: target.clone(),
        })
        .collect()
}

fn credential_subtype(class: CredentialClass) -> &'static str {
    match class {
        CredentialClass::DatabasePassword => "password",
        CredentialClass::ApiKey => "api_key",
        CredentialClass::Jwt => "jwt",
        CredentialClass::PrivateKey => "private_key",
        CredentialClass::PaymentCard => "payment_card",
        CredentialClass::BearerToken => "bearer_token",
        CredentialClass::SshPublicKey => "ssh_public_key",
        CredentialClass::GenericSecret => "generic_secret",
    }
}

/// Sanitized, length-bounded excerpt for a `Vulnerability`'s contextual
/// field — not the §6 preview sanitizer (that one also escapes control
/// bytes byte-for-byte); this one just truncates valid UTF-8 safely.
pub fn excerpt(bytes: &[u8], max_len: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max_len {
        text.into_owned()
    } else {
        let mut end = max_len;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}

/// One cross-frame check over a `Session`: the same credential value
/// surfacing in more than one frame of the same session is a stronger
/// signal than any single-frame finding (e.g. a token resent in plaintext
/// across a retried request).
pub fn session_credential_reuse(
    session: &Session,
    per_frame_credentials: &[Vec<Credential>],
    target: &Target,
) -> Vec<Vulnerability> {
    use std::collections::HashMap;
    let mut seen: HashMap<&str, (usize, &Credential)> = HashMap::new();
    let mut findings = Vec::new();

    for (idx, creds) in per_frame_credentials.iter().enumerate() {
        for cred in creds {
            if let Some((first_idx, first_cred)) = seen.get(cred.value.as_str()) {
                if *first_idx != idx {
                    let frame = session.frames.get(idx);
                    findings.push(Vulnerability {
                        id: Vulnerability::new_id(),
                        timestamp: frame.map(|f| f.timestamp).unwrap_or_else(chrono::Utc::now),
                        severity: Severity::High.max(first_cred.severity),
                        kind: VulnerabilityKind {
                            vuln_type: "session_integrity".to_string(),
                            subtype: "credential_reuse".to_string(),
                        },
                        evidence: cred.redacted.clone(),
                        stream: frame.map(|f| f.stream).unwrap_or(StreamKind::Unknown),
                        excerpt: format!(
                            "same {} reused across frames {} and {} of session {}",
                            credential_subtype(cred.class),
                            first_idx,
                            idx,
                            session.correlation_id
                        ),
                        confidence: cred.confidence.min(0.9),
                        target: target.clone(),
                    });
                }
            } else {
                seen.insert(cred.value.as_str(), (idx, cred));
            }
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CredentialClass, FieldValue, Protocol};
    use std::collections::BTreeMap;

    fn target() -> Target {
        Target::new(123, "test".to_string())
    }

    fn frame() -> Frame {
        Frame {
            protocol: Protocol::PlainText,
            frame_type: "line".to_string(),
            fields: BTreeMap::from([("line".to_string(), FieldValue::Str("x".to_string()))]),
            raw: b"hello world".to_vec(),
            stream: StreamKind::Output,
            timestamp: chrono::Utc::now(),
            session_id: None,
        }
    }

    #[test]
    fn credential_bridges_to_exposure_vuln() {
        let cred = Credential {
            class: CredentialClass::ApiKey,
            value: "sk-secret".to_string(),
            redacted: "sk-0...cdef".to_string(),
            confidence: 0.9,
            severity: Severity::Critical,
        };
        let vulns = credential_vulnerabilities(&[cred], &frame(), &target());
        assert_eq!(vulns.len(), 1);
        assert_eq!(vulns[0].kind.vuln_type, "credential_exposure");
        assert_eq!(vulns[0].kind.subtype, "api_key");
        assert_eq!(vulns[0].severity, Severity::Critical);
    }

    #[test]
    fn reused_credential_flagged_once_per_repeat() {
        let cred = Credential {
            class: CredentialClass::Jwt,
            value: "same-token".to_string(),
            redacted: "eyJ...XYZ".to_string(),
            confidence: 0.8,
            severity: Severity::High,
        };
        let session = Session {
            correlation_id: "abc".to_string(),
            frames: vec![frame(), frame(), frame()],
        };
        let per_frame = vec![vec![cred.clone()], vec![], vec![cred]];
        let findings = session_credential_reuse(&session, &per_frame, &target());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind.subtype, "credential_reuse");
    }
}
