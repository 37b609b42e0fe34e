use super::{BoundaryDetector, BoundaryStatus};
use crate::model::Protocol;

/// Newline-delimited fallback: the first delimiter byte terminates the
/// message. Falls through to `Invalid` once the stream exceeds
/// `max_message_size()` with no delimiter in sight, same as every other
/// detector's oversized-input handling; this is still tried last by the
/// auto-detect wrapper since any delimited text matches it.
pub struct LineDetector {
    delimiter: u8,
}

impl Default for LineDetector {
    fn default() -> Self {
        Self { delimiter: b'\n' }
    }
}

impl LineDetector {
    pub fn with_delimiter(delimiter: u8) -> Self {
        Self { delimiter }
    }
}

impl BoundaryDetector for LineDetector {
    fn protocol(&self) -> Protocol {
        Protocol::PlainText
    }

    fn detect(&self, bytes: &[u8]) -> BoundaryStatus {
        match bytes.iter().position(|&b| b == self.delimiter) {
            Some(pos) => BoundaryStatus::Found {
                message_size: pos + 1,
            },
            None if bytes.len() > self.max_message_size() => BoundaryStatus::Invalid,
            None => BoundaryStatus::NeedMore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminates_at_first_delimiter() {
        let d = LineDetector::default();
        assert_eq!(
            d.detect(b"hello\nworld\n"),
            BoundaryStatus::Found { message_size: 6 }
        );
    }

    #[test]
    fn needs_more_without_delimiter() {
        let d = LineDetector::default();
        assert_eq!(d.detect(b"no newline yet"), BoundaryStatus::NeedMore);
    }

    #[test]
    fn custom_delimiter() {
        let d = LineDetector::with_delimiter(b'\0');
        assert_eq!(
            d.detect(b"a\0b"),
            BoundaryStatus::Found { message_size: 2 }
        );
    }
}
