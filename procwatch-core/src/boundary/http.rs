use super::{BoundaryDetector, BoundaryStatus};
use crate::model::Protocol;

const METHODS: &[&str] = &[
    "GET ", "POST ", "PUT ", "DELETE ", "HEAD ", "OPTIONS ", "PATCH ", "CONNECT ", "TRACE ",
];
const RESPONSE_PREFIX: &str = "HTTP/";

pub struct HttpDetector;

enum Match {
    Full,
    Partial,
    None,
}

impl HttpDetector {
    fn classify(bytes: &[u8]) -> Match {
        let mut partial = false;
        for candidate in METHODS.iter().chain(std::iter::once(&RESPONSE_PREFIX)) {
            let cb = candidate.as_bytes();
            if bytes.starts_with(cb) {
                return Match::Full;
            }
            if cb.starts_with(bytes) {
                partial = true;
            }
        }
        if partial {
            Match::Partial
        } else {
            Match::None
        }
    }

    /// Finds the end of the header block (index just past the blank-line
    /// terminator), handling both CRLF and bare-LF conventions.
    fn find_header_end(bytes: &[u8]) -> Option<usize> {
        if let Some(pos) = find(bytes, b"\r\n\r\n") {
            return Some(pos + 4);
        }
        find(bytes, b"\n\n").map(|pos| pos + 2)
    }

    fn header_value<'a>(headers: &'a str, name: &str) -> Option<&'a str> {
        for line in headers.split("\r\n").flat_map(|l| l.split('\n')) {
            if let Some((k, v)) = line.split_once(':') {
                if k.trim().eq_ignore_ascii_case(name) {
                    return Some(v.trim());
                }
            }
        }
        None
    }

    fn is_chunked(headers: &str) -> bool {
        Self::header_value(headers, "Transfer-Encoding")
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
    }

    /// Scans chunked-encoded body bytes for the terminating zero-length
    /// chunk. Returns the total body length (including the terminator) if
    /// complete.
    fn chunked_body_len(body: &[u8]) -> Option<usize> {
        let mut pos = 0usize;
        loop {
            let line_end = find(&body[pos..], b"\r\n")? + pos;
            let size_line = std::str::from_utf8(&body[pos..line_end]).ok()?;
            let size_str = size_line.split(';').next().unwrap_or("").trim();
            let size = usize::from_str_radix(size_str, 16).ok()?;
            let chunk_start = line_end + 2;
            if size == 0 {
                // zero-length chunk, followed by optional trailers and the
                // final CRLF terminator.
                let term = find(&body[chunk_start..], b"\r\n")? + chunk_start + 2;
                return Some(term);
            }
            let chunk_end = chunk_start + size;
            if chunk_end + 2 > body.len() {
                return None;
            }
            pos = chunk_end + 2;
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
}

impl BoundaryDetector for HttpDetector {
    fn protocol(&self) -> Protocol {
        Protocol::Http
    }

    fn min_message_size(&self) -> usize {
        16
    }

    fn detect(&self, bytes: &[u8]) -> BoundaryStatus {
        match Self::classify(bytes) {
            Match::None => return BoundaryStatus::Invalid,
            Match::Partial => return BoundaryStatus::NeedMore,
            Match::Full => {}
        }
        let Some(header_end) = Self::find_header_end(bytes) else {
            if bytes.len() > self.max_message_size() {
                return BoundaryStatus::Invalid;
            }
            return BoundaryStatus::NeedMore;
        };
        let headers = match std::str::from_utf8(&bytes[..header_end]) {
            Ok(h) => h,
            Err(_) => return BoundaryStatus::Invalid,
        };

        if Self::is_chunked(headers) {
            let body = &bytes[header_end..];
            return match Self::chunked_body_len(body) {
                Some(body_len) => BoundaryStatus::Found {
                    message_size: header_end + body_len,
                },
                None if bytes.len() > self.max_message_size() => BoundaryStatus::Invalid,
                None => BoundaryStatus::NeedMore,
            };
        }

        if let Some(len_str) = Self::header_value(headers, "Content-Length") {
            let Ok(content_length) = len_str.parse::<usize>() else {
                return BoundaryStatus::Invalid;
            };
            let total = header_end + content_length;
            if bytes.len() < total {
                if total > self.max_message_size() {
                    return BoundaryStatus::Invalid;
                }
                return BoundaryStatus::NeedMore;
            }
            return BoundaryStatus::Found { message_size: total };
        }

        BoundaryStatus::Found {
            message_size: header_end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_length_zero_ends_at_headers() {
        let msg = b"GET / HTTP/1.1\r\nHost: x\r\nContent-Length: 0\r\n\r\n";
        let status = HttpDetector.detect(msg);
        assert_eq!(
            status,
            BoundaryStatus::Found {
                message_size: msg.len()
            }
        );
    }

    #[test]
    fn needs_more_on_prefix() {
        let full = b"POST /login HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello";
        for n in 1..full.len() {
            let prefix = &full[..n];
            assert_eq!(HttpDetector.detect(prefix), BoundaryStatus::NeedMore);
        }
        assert_eq!(
            HttpDetector.detect(full),
            BoundaryStatus::Found {
                message_size: full.len()
            }
        );
    }

    #[test]
    fn chunked_body_terminates_at_zero_chunk() {
        let msg = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n";
        let status = HttpDetector.detect(msg);
        assert_eq!(
            status,
            BoundaryStatus::Found {
                message_size: msg.len()
            }
        );
    }

    #[test]
    fn non_http_is_invalid() {
        assert_eq!(HttpDetector.detect(b"not http at all!"), BoundaryStatus::Invalid);
    }
}
