use super::{BoundaryDetector, BoundaryStatus};
use crate::model::Protocol;

const HEADER_LEN: usize = 5;
const DEFAULT_MAX_LEN: u32 = 4 * 1024 * 1024;
/// A well-known upgrade preface this detector declines to parse as its own
/// framing (e.g. an HTTP/2-style connection preface sharing the same first
/// bytes as a plausible flag+length header).
const UPGRADE_PREFACE: &[u8] = b"PRI * HTTP";

pub struct RpcDetector {
    max_len: u32,
}

impl Default for RpcDetector {
    fn default() -> Self {
        Self {
            max_len: DEFAULT_MAX_LEN,
        }
    }
}

impl BoundaryDetector for RpcDetector {
    fn protocol(&self) -> Protocol {
        Protocol::LengthPrefixedRpc
    }

    fn min_message_size(&self) -> usize {
        HEADER_LEN
    }

    fn max_message_size(&self) -> usize {
        HEADER_LEN + self.max_len as usize
    }

    fn detect(&self, bytes: &[u8]) -> BoundaryStatus {
        if bytes.starts_with(UPGRADE_PREFACE) {
            return BoundaryStatus::Invalid;
        }
        if bytes.len() < HEADER_LEN {
            return BoundaryStatus::NeedMore;
        }
        let flag = bytes[0];
        if flag > 1 {
            return BoundaryStatus::Invalid;
        }
        let length = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        if length > self.max_len {
            return BoundaryStatus::Invalid;
        }
        let total = HEADER_LEN + length as usize;
        if bytes.len() < total {
            return BoundaryStatus::NeedMore;
        }
        BoundaryStatus::Found { message_size: total }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_message() {
        let bytes = [0x00, 0x00, 0x00, 0x00, 0x05, b'H', b'e', b'l', b'l', b'o'];
        let status = RpcDetector::default().detect(&bytes);
        assert_eq!(status, BoundaryStatus::Found { message_size: 10 });
    }

    #[test]
    fn needs_more_for_partial_header() {
        let bytes = [0x00, 0x00];
        assert_eq!(RpcDetector::default().detect(&bytes), BoundaryStatus::NeedMore);
    }

    #[test]
    fn rejects_bad_flag_byte() {
        let bytes = [0x02, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(RpcDetector::default().detect(&bytes), BoundaryStatus::Invalid);
    }

    #[test]
    fn rejects_oversized_length() {
        let bytes = [0x00, 0xFF, 0xFF, 0xFF, 0xFF];
        assert_eq!(RpcDetector::default().detect(&bytes), BoundaryStatus::Invalid);
    }

    #[test]
    fn declines_upgrade_preface() {
        let bytes = b"PRI * HTTP/2.0\r\n\r\n";
        assert_eq!(RpcDetector::default().detect(bytes), BoundaryStatus::Invalid);
    }
}
