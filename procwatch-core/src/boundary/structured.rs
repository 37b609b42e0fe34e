use super::{BoundaryDetector, BoundaryStatus};
use crate::model::Protocol;

pub struct StructuredDetector;

impl BoundaryDetector for StructuredDetector {
    fn protocol(&self) -> Protocol {
        Protocol::Structured
    }

    fn min_message_size(&self) -> usize {
        2
    }

    fn detect(&self, bytes: &[u8]) -> BoundaryStatus {
        let start = bytes.iter().position(|b| !b.is_ascii_whitespace());
        let Some(start) = start else {
            return BoundaryStatus::NeedMore;
        };
        match bytes[start] {
            b'{' | b'[' => {}
            _ => return BoundaryStatus::Invalid,
        }

        let mut stack: Vec<u8> = Vec::new();
        let mut in_string = false;
        let mut escaped = false;

        for (i, &b) in bytes.iter().enumerate().skip(start) {
            if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' | b'[' => stack.push(b),
                b'}' => match stack.pop() {
                    Some(b'{') => {}
                    _ => return BoundaryStatus::Invalid,
                },
                b']' => match stack.pop() {
                    Some(b'[') => {}
                    _ => return BoundaryStatus::Invalid,
                },
                _ => {}
            }
            if stack.is_empty() && matches!(b, b'}' | b']') {
                return BoundaryStatus::Found {
                    message_size: i + 1,
                };
            }
        }

        if bytes.len() > self.max_message_size() {
            BoundaryStatus::Invalid
        } else {
            BoundaryStatus::NeedMore
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_chunk_accumulation() {
        let d = StructuredDetector;
        assert_eq!(d.detect(b"{\"a\":[1,2,"), BoundaryStatus::NeedMore);
        let whole = b"{\"a\":[1,2,3]}\n";
        assert_eq!(
            d.detect(whole),
            BoundaryStatus::Found { message_size: 13 }
        );
        assert_eq!(&whole[..13], b"{\"a\":[1,2,3]}");
    }

    #[test]
    fn closing_brace_inside_string_is_content() {
        let d = StructuredDetector;
        let msg = br#"{"a":"}"}"#;
        let status = d.detect(msg);
        assert_eq!(
            status,
            BoundaryStatus::Found {
                message_size: msg.len()
            }
        );
    }

    #[test]
    fn mismatched_closer_is_invalid() {
        let d = StructuredDetector;
        assert_eq!(d.detect(b"{]"), BoundaryStatus::Invalid);
    }

    #[test]
    fn leading_whitespace_is_skipped() {
        let d = StructuredDetector;
        assert_eq!(
            d.detect(b"   {\"a\":1}"),
            BoundaryStatus::Found { message_size: 10 }
        );
    }
}
