use super::Dissector;
use crate::model::{
    Credential, DissectionError, Event, FieldValue, Frame, Protocol, Severity, Target,
    Vulnerability, VulnerabilityKind,
};
use crate::vuln::{credential_vulnerabilities, excerpt};
use std::collections::BTreeMap;

pub struct SqlDissector;

const STATEMENT_TYPES: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "ALTER", "GRANT", "REVOKE",
];

/// Fixed list of injection-signature substrings. Deliberately simple
/// literal matches, not a general SQL parser.
const INJECTION_SIGNATURES: &[&str] = &[
    "' OR '1'='1",
    "' OR 1=1",
    "\" OR \"1\"=\"1",
    "; DROP TABLE",
    "UNION SELECT",
    "--",
    "/*",
    "xp_cmdshell",
];

impl Dissector for SqlDissector {
    fn name(&self) -> &'static str {
        "sql"
    }

    fn identify(&self, event: &Event) -> (bool, f32) {
        if event.protocol == Protocol::Sql {
            return (true, 0.9);
        }
        let Ok(text) = std::str::from_utf8(&event.bytes) else {
            return (false, 0.0);
        };
        let upper = text.trim_start().to_ascii_uppercase();
        let matches = STATEMENT_TYPES.iter().any(|t| upper.starts_with(*t));
        (matches, 0.5)
    }

    fn dissect(&self, event: &Event) -> Result<Frame, DissectionError> {
        let text = std::str::from_utf8(&event.bytes)
            .map_err(|e| DissectionError {
                protocol: Protocol::Sql,
                reason: format!("non-utf8 sql text: {e}"),
            })?
            .trim();

        let upper = text.to_ascii_uppercase();
        let statement_type: &str = STATEMENT_TYPES
            .iter()
            .copied()
            .find(|t| upper.starts_with(t))
            .ok_or_else(|| DissectionError {
                protocol: Protocol::Sql,
                reason: "no recognizable statement type token".to_string(),
            })?;

        let tables = extract_table_names(text, statement_type);

        let mut fields = BTreeMap::new();
        fields.insert(
            "statement_type".to_string(),
            FieldValue::Str(statement_type.to_string()),
        );
        fields.insert(
            "tables".to_string(),
            FieldValue::List(tables.into_iter().map(FieldValue::Str).collect()),
        );
        fields.insert("statement".to_string(), FieldValue::Str(text.to_string()));

        Ok(Frame {
            protocol: Protocol::Sql,
            frame_type: statement_type.to_lowercase(),
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
        let mut vulns = credential_vulnerabilities(credentials, frame, target);

        let Some(statement) = frame.field_str("statement") else {
            return vulns;
        };
        let upper = statement.to_ascii_uppercase();

        for sig in INJECTION_SIGNATURES {
            if upper.contains(&sig.to_ascii_uppercase()) {
                vulns.push(Vulnerability {
                    id: Vulnerability::new_id(),
                    timestamp: frame.timestamp,
                    severity: Severity::Critical,
                    kind: VulnerabilityKind {
                        vuln_type: "sql_injection".to_string(),
                        subtype: sig.to_string(),
                    },
                    evidence: format!("statement matched injection signature {sig:?}"),
                    stream: frame.stream,
                    excerpt: excerpt(statement.as_bytes(), 120),
                    confidence: 0.75,
                    target: target.clone(),
                });
            }
        }

        if upper.contains("PASSWORD") && (upper.starts_with("UPDATE") || upper.starts_with("INSERT"))
        {
            vulns.push(Vulnerability {
                id: Vulnerability::new_id(),
                timestamp: frame.timestamp,
                severity: Severity::High,
                kind: VulnerabilityKind {
                    vuln_type: "credential_exposure".to_string(),
                    subtype: "password_in_statement".to_string(),
                },
                evidence: "statement writes a password-named column in plaintext".to_string(),
                stream: frame.stream,
                excerpt: excerpt(statement.as_bytes(), 120),
                confidence: 0.55,
                target: target.clone(),
            });
        }

        vulns
    }
}

/// Best-effort table-name extraction: looks at the token(s) following
/// `FROM`/`INTO`/`UPDATE`/`TABLE`, stopping at the next clause keyword or
/// punctuation. Not a full-grammar SQL parser by design (spec's
/// out-of-scope: "arbitrary protocol dissection beyond the enumerated
/// framings").
fn extract_table_names(text: &str, statement_type: &str) -> Vec<String> {
    let anchor = match statement_type {
        "SELECT" => "FROM",
        "INSERT" => "INTO",
        "UPDATE" => "UPDATE",
        "DELETE" => "FROM",
        "CREATE" | "ALTER" | "DROP" => "TABLE",
        _ => return Vec::new(),
    };

    let upper = text.to_ascii_uppercase();
    let mut tables = Vec::new();
    let mut search_from = 0usize;
    while let Some(rel) = upper[search_from..].find(anchor) {
        let start = search_from + rel + anchor.len();
        let rest = text[start..].trim_start();
        let name: String = rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '.')
            .collect();
        if !name.is_empty() {
            tables.push(name);
        }
        search_from = start;
        if search_from >= upper.len() {
            break;
        }
    }
    tables
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StreamKind;

    fn event(text: &str) -> Event {
        Event {
            bytes: text.as_bytes().to_vec(),
            protocol: Protocol::Sql,
            frame_type: String::new(),
            timestamp: chrono::Utc::now(),
            stream_offset: 0,
            stream: StreamKind::Output,
        }
    }

    #[test]
    fn select_statement_extracts_table() {
        let frame = SqlDissector
            .dissect(&event("SELECT * FROM users WHERE id = 1"))
            .unwrap();
        assert_eq!(frame.field_str("statement_type"), Some("SELECT"));
        match frame.fields.get("tables") {
            Some(FieldValue::List(list)) => {
                assert_eq!(list.len(), 1);
                assert_eq!(list[0], FieldValue::Str("users".to_string()));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn classic_injection_signature_is_flagged() {
        let frame = SqlDissector
            .dissect(&event("SELECT * FROM users WHERE name = '' OR '1'='1'"))
            .unwrap();
        let target = Target::new(1, "test".to_string());
        let vulns = SqlDissector.find_vulnerabilities(&frame, &[], &target);
        assert!(vulns.iter().any(|v| v.kind.vuln_type == "sql_injection"));
    }

    #[test]
    fn update_password_column_flagged() {
        let frame = SqlDissector
            .dissect(&event("UPDATE users SET password = 'hunter2' WHERE id = 1"))
            .unwrap();
        let target = Target::new(1, "test".to_string());
        let vulns = SqlDissector.find_vulnerabilities(&frame, &[], &target);
        assert!(vulns
            .iter()
            .any(|v| v.kind.subtype == "password_in_statement"));
    }
}
