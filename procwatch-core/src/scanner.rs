//! CredentialScanner: a fixed, immutable registry of named regex patterns
//! producing `Credential` findings from any byte slice.
//!
//! Pattern-registry style follows `enforcement::safety` (builds its rule
//! set once behind a `once_cell::Lazy` and never mutates it at runtime); the
//! redaction/confidence-floor/placeholder-filter design follows
//! `datadog-trace-obfuscation`'s credit-card and replacer modules,
//! generalized here from "payment card only" to the full credential class
//! list this scanner covers.

use crate::model::{Credential, CredentialClass, Severity};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

struct Pattern {
    regex: Regex,
    class: CredentialClass,
    base_confidence: f32,
    severity: Severity,
    redact: fn(&str) -> String,
}

const CONFIDENCE_FLOOR: f32 = 0.5;
const PLACEHOLDER_PENALTY: f32 = 0.4;

static PATTERNS: Lazy<Vec<Pattern>> = Lazy::new(|| {
    vec![
        Pattern {
            regex: Regex::new(
                r"(?i)(?:postgres|postgresql|mysql|mongodb|redis|amqp)://[^\s:]+:[^\s@]+@[^\s/]+",
            )
            .unwrap(),
            class: CredentialClass::DatabasePassword,
            base_confidence: 0.9,
            severity: Severity::Critical,
            redact: redact_full,
        },
        Pattern {
            regex: Regex::new(r"(?i)\bauthorization:\s*bearer\s+([A-Za-z0-9\-_.~+/=]{10,})")
                .unwrap(),
            class: CredentialClass::BearerToken,
            base_confidence: 0.8,
            severity: Severity::High,
            redact: redact_head_tail,
        },
        Pattern {
            regex: Regex::new(r"\beyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\b").unwrap(),
            class: CredentialClass::Jwt,
            base_confidence: 0.85,
            severity: Severity::High,
            redact: redact_segments,
        },
        Pattern {
            regex: Regex::new(r"\bsk-[A-Za-z0-9]{20,}\b").unwrap(),
            class: CredentialClass::ApiKey,
            base_confidence: 0.9,
            severity: Severity::Critical,
            redact: redact_head_tail,
        },
        Pattern {
            regex: Regex::new(r"\b(?:ghp|gho|ghu|ghs|ghr)_[A-Za-z0-9]{30,}\b").unwrap(),
            class: CredentialClass::ApiKey,
            base_confidence: 0.9,
            severity: Severity::Critical,
            redact: redact_head_tail,
        },
        Pattern {
            regex: Regex::new(r"\bAKIA[0-9A-Z]{16}\b").unwrap(),
            class: CredentialClass::ApiKey,
            base_confidence: 0.9,
            severity: Severity::Critical,
            redact: redact_head_tail,
        },
        Pattern {
            regex: Regex::new(r#"(?i)\b(?:api[_-]?key|secret|token)\s*[=:]\s*['"]?([A-Za-z0-9\-_./+]{8,})['"]?"#)
                .unwrap(),
            class: CredentialClass::GenericSecret,
            base_confidence: 0.6,
            severity: Severity::High,
            redact: redact_head_tail,
        },
        Pattern {
            regex: Regex::new(r#"(?i)\bpassword\s*[=:]\s*['"]?([^\s'",}]{3,})['"]?"#).unwrap(),
            class: CredentialClass::DatabasePassword,
            base_confidence: 0.65,
            severity: Severity::Critical,
            redact: redact_full,
        },
        Pattern {
            regex: Regex::new(r"-----BEGIN (?:RSA |EC |OPENSSH |DSA )?PRIVATE KEY-----").unwrap(),
            class: CredentialClass::PrivateKey,
            base_confidence: 0.95,
            severity: Severity::Critical,
            redact: redact_full,
        },
        Pattern {
            regex: Regex::new(r"\bssh-(?:rsa|ed25519|dss|ecdsa[A-Za-z0-9-]*) [A-Za-z0-9+/]{20,}={0,2}(?: \S+)?\b")
                .unwrap(),
            class: CredentialClass::SshPublicKey,
            base_confidence: 0.8,
            severity: Severity::Medium,
            redact: redact_segments,
        },
        Pattern {
            regex: Regex::new(r"\b(?:\d[ -]?){13,19}\b").unwrap(),
            class: CredentialClass::PaymentCard,
            base_confidence: 0.7,
            severity: Severity::Critical,
            redact: redact_last_four,
        },
    ]
});

const PLACEHOLDER_MARKERS: &[&str] = &["example", "changeme", "xxxx", "your-", "<your", "${"];

fn looks_like_placeholder(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    if PLACEHOLDER_MARKERS.iter().any(|m| lower.contains(m)) {
        return true;
    }
    let bytes = value.as_bytes();
    if bytes.len() > 4 && bytes.iter().all(|&b| b == bytes[0]) {
        return true;
    }
    false
}

fn digits_only(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Luhn checksum, used to keep the generic digit-run regex from flagging
/// every 13-19 digit number as a payment card.
fn passes_luhn(digits: &str) -> bool {
    if digits.len() < 13 || digits.len() > 19 {
        return false;
    }
    let mut sum = 0u32;
    let mut double = false;
    for c in digits.chars().rev() {
        let mut d = c.to_digit(10).unwrap();
        if double {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
        double = !double;
    }
    sum % 10 == 0
}

fn redact_full(_value: &str) -> String {
    "[redacted]".to_string()
}

fn redact_head_tail(value: &str) -> String {
    if value.len() <= 8 {
        return "[redacted]".to_string();
    }
    format!("{}...{}", &value[..4], &value[value.len() - 4..])
}

fn redact_segments(value: &str) -> String {
    let parts: Vec<&str> = value.split('.').collect();
    if parts.len() < 2 {
        return redact_head_tail(value);
    }
    let head = &parts[0][..parts[0].len().min(6)];
    let tail = parts.last().unwrap();
    let tail = &tail[tail.len().saturating_sub(4)..];
    format!("{}...{}", head, tail)
}

fn redact_last_four(value: &str) -> String {
    let digits = digits_only(value);
    if digits.len() < 4 {
        return "[redacted]".to_string();
    }
    format!("...{}", &digits[digits.len() - 4..])
}

/// Stateless, immutable-registry scanner. Holds no per-instance state so
/// one scanner can be shared across every Ring's dissection task.
pub struct CredentialScanner;

impl CredentialScanner {
    pub fn new() -> Self {
        Self
    }

    /// Scans `text` against the full pattern registry, applying the
    /// placeholder penalty, confidence floor, and (class, value) dedup.
    /// Idempotent: repeated calls on the same input return the same set of
    /// (class, redacted, severity) triples, order aside.
    ///
    /// Patterns are declared most-specific first (`sk-`, `ghp_`, `AKIA`
    /// ahead of the generic `api_key=`/`token=` catch-all), and a match is
    /// only accepted if its byte span doesn't overlap one an earlier,
    /// higher-priority pattern already claimed — otherwise a single secret
    /// like `API_KEY=sk-...` would surface once as a specific `ApiKey`
    /// finding and again as a generic one for the same bytes.
    pub fn hunt(&self, text: &str) -> Vec<Credential> {
        let mut seen = HashSet::new();
        let mut claimed: Vec<std::ops::Range<usize>> = Vec::new();
        let mut out = Vec::new();

        for pattern in PATTERNS.iter() {
            for m in pattern.regex.find_iter(text) {
                let span = m.start()..m.end();
                if claimed.iter().any(|c| c.start < span.end && span.start < c.end) {
                    continue;
                }

                let value = m.as_str();
                if pattern.class == CredentialClass::PaymentCard {
                    let digits = digits_only(value);
                    if !passes_luhn(&digits) {
                        continue;
                    }
                }

                let mut confidence = pattern.base_confidence;
                if looks_like_placeholder(value) {
                    confidence -= PLACEHOLDER_PENALTY;
                }
                if confidence < CONFIDENCE_FLOOR {
                    continue;
                }

                let key = (pattern.class, value.to_string());
                if !seen.insert(key) {
                    continue;
                }

                claimed.push(span);
                out.push(Credential {
                    class: pattern.class,
                    value: value.to_string(),
                    redacted: (pattern.redact)(value),
                    confidence,
                    severity: pattern.severity,
                });
            }
        }
        out
    }
}

impl Default for CredentialScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_redaction_matches_scenario_one() {
        let scanner = CredentialScanner::new();
        let text = "API_KEY=sk-0123456789abcdef0123456789abcdef0123456789abcdef\n";
        let found = scanner.hunt(text);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].class, CredentialClass::ApiKey);
        assert_eq!(found[0].severity, Severity::Critical);
        assert_eq!(found[0].redacted, "sk-0...cdef");
    }

    #[test]
    fn password_field_is_fully_elided() {
        let scanner = CredentialScanner::new();
        let found = scanner.hunt(r#"{"password":"hunter2"}"#);
        assert!(found.iter().any(|c| c.class == CredentialClass::DatabasePassword
            && c.redacted == "[redacted]"));
    }

    #[test]
    fn placeholder_values_are_discounted_below_floor() {
        let scanner = CredentialScanner::new();
        let found = scanner.hunt("api_key=changemechangemechangeme");
        assert!(found.is_empty());
    }

    #[test]
    fn non_luhn_digit_run_is_not_a_payment_card() {
        let scanner = CredentialScanner::new();
        let found = scanner.hunt("tracking number 1234567890123456789");
        assert!(!found.iter().any(|c| c.class == CredentialClass::PaymentCard));
    }

    #[test]
    fn valid_luhn_card_is_flagged_with_last_four() {
        let scanner = CredentialScanner::new();
        // A well-known Luhn-valid test PAN.
        let found = scanner.hunt("card: 4111111111111111");
        let card = found
            .iter()
            .find(|c| c.class == CredentialClass::PaymentCard)
            .expect("expected a payment card finding");
        assert_eq!(card.redacted, "...1111");
    }

    #[test]
    fn hunt_is_idempotent() {
        let scanner = CredentialScanner::new();
        let text = "token=abcdef0123456789 and password: hunter2";
        let mut a = scanner.hunt(text);
        let mut b = scanner.hunt(text);
        let key = |c: &Credential| (c.class, c.redacted.clone(), c.severity);
        a.sort_by_key(key);
        b.sort_by_key(key);
        let a_keys: Vec<_> = a.iter().map(key).collect();
        let b_keys: Vec<_> = b.iter().map(key).collect();
        assert_eq!(a_keys, b_keys);
    }

    #[test]
    fn duplicate_matches_are_deduped() {
        let scanner = CredentialScanner::new();
        let text = "token=abcdef0123456789 token=abcdef0123456789";
        let found = scanner.hunt(text);
        assert_eq!(found.iter().filter(|c| c.class == CredentialClass::GenericSecret).count(), 1);
    }
}
