//! Incremental HTTP/1.1 request parsing.
//!
//! The parser makes forward progress only when enough bytes are present
//! and never blocks; the result is independent of how the input is
//! partitioned across `append` calls because every phase re-derives its
//! state from the accumulated raw buffer.

use super::request::Request;

impl Request {
    /// Feeds one socket read's worth of bytes into the request.
    pub fn append(&mut self, bytes: &[u8]) {
        self.raw.extend_from_slice(bytes);
        if !self.headers_complete {
            self.parse_headers();
        } else if !self.body_complete && !self.parse_error {
            self.advance_body();
        }
    }

    /// Attempts to parse the header block. Returns true once the header
    /// phase is decided, which includes the malformed-request case
    /// (`parse_error` is set and the request reports complete).
    pub fn parse_headers(&mut self) -> bool {
        if self.headers_complete {
            return true;
        }
        let Some(idx) = twoway::find_bytes(&self.raw, b"\r\n\r\n") else {
            return false;
        };
        self.header_end = idx + 4;

        let head = match String::from_utf8(self.raw[..idx].to_vec()) {
            Ok(s) => s,
            Err(_) => return self.fail(400),
        };
        let mut lines = head.split("\r\n");
        let request_line = lines.next().unwrap_or("");
        let mut words = request_line.split_whitespace();
        self.method = words.next().unwrap_or("").to_string();
        self.target = words.next().unwrap_or("").to_string();
        self.version = words.next().unwrap_or("").to_string();
        if let Some(code) = self.request_line_error() {
            return self.fail(code);
        }

        for line in lines {
            if line.is_empty() {
                continue;
            }
            if let Some((name, value)) = line.split_once(':') {
                self.headers.insert(name, value.trim_start_matches([' ', '\t']));
            }
        }

        if let Some(cl) = self.headers.get("Content-Length") {
            self.content_length = cl.trim().parse().unwrap_or(0);
        }
        if self.version == "HTTP/1.1" && self.headers.get("Host").map_or(true, str::is_empty) {
            return self.fail(400);
        }
        if let Some(te) = self.headers.get("Transfer-Encoding") {
            if te.to_ascii_lowercase().contains("chunked") {
                self.is_chunked = true;
            }
        }

        self.headers_complete = true;
        self.advance_body();
        true
    }

    /// Request-line validation per RFC 7230, in order; the first failing
    /// rule decides the error code.
    fn request_line_error(&self) -> Option<u16> {
        if self.method.is_empty() || !self.method.bytes().all(|b| b.is_ascii_uppercase()) {
            return Some(400);
        }
        if self.target.is_empty() || (self.target != "*" && !self.target.starts_with('/')) {
            return Some(400);
        }
        let Some(ver) = self.version.strip_prefix("HTTP/") else {
            return Some(400);
        };
        let v = ver.as_bytes();
        if v.len() < 3 || !v[0].is_ascii_digit() || v[1] != b'.' || !v[2].is_ascii_digit() {
            return Some(400);
        }
        if self.version != "HTTP/1.0" && self.version != "HTTP/1.1" {
            return Some(505);
        }
        None
    }

    fn fail(&mut self, code: u16) -> bool {
        self.parse_error = true;
        self.error_code = code;
        self.headers_complete = true;
        self.body_complete = true;
        self.consumed = self.raw.len();
        true
    }

    fn advance_body(&mut self) {
        if self.is_chunked {
            match decode_chunked(&self.raw[self.header_end..]) {
                ChunkProgress::Complete { data, consumed } => {
                    self.body = data;
                    self.consumed = self.header_end + consumed;
                    self.body_complete = true;
                }
                ChunkProgress::Incomplete { received } => {
                    // Keeps the running total visible so size limits
                    // apply before the stream finishes decoding.
                    self.body_received = received;
                }
                ChunkProgress::Bad => {
                    self.fail(400);
                }
            }
            return;
        }
        let available = self.raw.len() - self.header_end;
        if self.content_length == 0 {
            self.body.clear();
            self.consumed = self.header_end;
            self.body_complete = true;
        } else if available >= self.content_length {
            let end = self.header_end + self.content_length;
            self.body = self.raw[self.header_end..end].to_vec();
            self.consumed = end;
            self.body_complete = true;
        } else {
            self.body = self.raw[self.header_end..].to_vec();
        }
    }
}

pub(crate) enum ChunkProgress {
    Complete { data: Vec<u8>, consumed: usize },
    /// Not enough bytes for the full stream. `received` counts the body
    /// bytes decoded so far plus the part of the current chunk already
    /// buffered, so callers can enforce size limits mid-stream.
    Incomplete { received: usize },
    Bad,
}

/// Decodes `hex_size ['; ext']* CRLF data CRLF` frames until the zero
/// chunk. Chunk extensions are ignored; trailers after the zero chunk are
/// consumed and discarded.
pub(crate) fn decode_chunked(input: &[u8]) -> ChunkProgress {
    let mut data = Vec::new();
    let mut pos = 0;
    loop {
        let Some(line_end) = twoway::find_bytes(&input[pos..], b"\r\n") else {
            return ChunkProgress::Incomplete { received: data.len() };
        };
        let Ok(size_line) = std::str::from_utf8(&input[pos..pos + line_end]) else {
            return ChunkProgress::Bad;
        };
        let size_token = size_line.split(';').next().unwrap_or("").trim();
        let Ok(size) = usize::from_str_radix(size_token, 16) else {
            return ChunkProgress::Bad;
        };
        pos += line_end + 2;
        if size == 0 {
            if input.len() < pos + 2 {
                return ChunkProgress::Incomplete { received: data.len() };
            }
            if &input[pos..pos + 2] == b"\r\n" {
                return ChunkProgress::Complete { data, consumed: pos + 2 };
            }
            return match twoway::find_bytes(&input[pos..], b"\r\n\r\n") {
                Some(t) => ChunkProgress::Complete { data, consumed: pos + t + 4 },
                None => ChunkProgress::Incomplete { received: data.len() },
            };
        }
        if input.len() < pos + size + 2 {
            let buffered = (input.len() - pos).min(size);
            return ChunkProgress::Incomplete { received: data.len() + buffered };
        }
        data.extend_from_slice(&input[pos..pos + size]);
        pos += size + 2;
    }
}

#[cfg(test)]
mod tests {
    use super::super::request::Request;
    use super::{decode_chunked, ChunkProgress};

    fn parse_whole(input: &[u8]) -> Request {
        let mut req = Request::new();
        req.append(input);
        req
    }

    fn parse_bytewise(input: &[u8]) -> Request {
        let mut req = Request::new();
        for b in input {
            req.append(std::slice::from_ref(b));
        }
        req
    }

    #[test]
    fn simple_get() {
        let req = parse_whole(b"GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n");
        assert!(req.is_complete());
        assert!(!req.parse_error);
        assert_eq!(req.method, "GET");
        assert_eq!(req.target, "/index.html");
        assert_eq!(req.version, "HTTP/1.1");
        assert!(req.body.is_empty());
    }

    #[test]
    fn parse_is_partition_independent() {
        let input = b"POST /submit?x=1 HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello";
        let a = parse_whole(input);
        let b = parse_bytewise(input);
        for req in [&a, &b] {
            assert!(req.is_complete());
            assert_eq!(req.method, "POST");
            assert_eq!(req.target, "/submit?x=1");
            assert_eq!(req.path(), "/submit");
            assert_eq!(req.query(), "x=1");
            assert_eq!(req.body, b"hello");
        }
        assert_eq!(a.headers.len(), b.headers.len());
    }

    #[test]
    fn header_value_is_left_trimmed_and_duplicates_overwrite() {
        let req = parse_whole(
            b"GET / HTTP/1.1\r\nHost: localhost\r\nX-Tag: \t  one\r\nx-tag: two\r\n\r\n",
        );
        assert_eq!(req.header("X-Tag"), Some("two"));
    }

    #[test]
    fn lowercase_method_is_rejected() {
        let req = parse_whole(b"get / HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(req.parse_error);
        assert_eq!(req.error_code, 400);
        assert!(req.is_complete());
    }

    #[test]
    fn relative_target_is_rejected() {
        let req = parse_whole(b"GET index.html HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(req.parse_error);
        assert_eq!(req.error_code, 400);
    }

    #[test]
    fn asterisk_target_is_accepted() {
        let req = parse_whole(b"OPTIONS * HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(!req.parse_error);
        assert_eq!(req.target, "*");
    }

    #[test]
    fn unknown_version_gets_505() {
        let req = parse_whole(b"GET / HTTP/2.0\r\nHost: x\r\n\r\n");
        assert!(req.parse_error);
        assert_eq!(req.error_code, 505);
    }

    #[test]
    fn garbage_version_gets_400() {
        let req = parse_whole(b"GET / HTTPS/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(req.error_code, 400);
    }

    #[test]
    fn missing_host_on_http11_gets_400() {
        let req = parse_whole(b"GET / HTTP/1.1\r\n\r\n");
        assert!(req.parse_error);
        assert_eq!(req.error_code, 400);
    }

    #[test]
    fn http10_does_not_require_host() {
        let req = parse_whole(b"GET / HTTP/1.0\r\n\r\n");
        assert!(!req.parse_error);
        assert!(req.is_complete());
        assert!(!req.wants_keep_alive());
    }

    #[test]
    fn incomplete_headers_make_no_progress() {
        let mut req = Request::new();
        req.append(b"GET / HTTP/1.1\r\nHost: local");
        assert!(!req.parse_headers());
        assert!(!req.headers_complete);
        req.append(b"host\r\n\r\n");
        assert!(req.is_complete());
    }

    #[test]
    fn body_truncated_to_content_length() {
        let req = parse_whole(b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 3\r\n\r\nabcdef");
        assert!(req.body_complete);
        assert_eq!(req.body, b"abc");
    }

    #[test]
    fn chunked_body_decodes() {
        let req = parse_whole(
            b"POST /up HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n\
              5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
        );
        assert!(req.is_complete());
        assert!(req.is_chunked);
        assert_eq!(req.body, b"hello world");
        assert_eq!(req.body.len(), 11);
    }

    #[test]
    fn chunked_waits_for_terminal_chunk() {
        let mut req = Request::new();
        req.append(b"POST / HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n");
        assert!(req.headers_complete);
        assert!(!req.body_complete);
        req.append(b"0\r\n\r\n");
        assert!(req.body_complete);
        assert_eq!(req.body, b"hello");
    }

    #[test]
    fn chunked_running_total_is_visible_before_completion() {
        let mut req = Request::new();
        req.append(b"POST / HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n");
        assert_eq!(req.body_len_so_far(), 0);
        req.append(b"5\r\nhello\r\n");
        assert!(!req.body_complete);
        assert_eq!(req.body_len_so_far(), 5);
        // A large chunk counts as soon as its bytes start arriving, not
        // only once its trailing CRLF lands.
        req.append(b"400\r\n");
        req.append(&[b'a'; 512]);
        assert!(!req.body_complete);
        assert_eq!(req.body_len_so_far(), 5 + 512);
    }

    #[test]
    fn chunk_extensions_are_ignored() {
        let req = parse_whole(
            b"POST / HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n\
              4;name=value\r\nwasd\r\n0\r\n\r\n",
        );
        assert_eq!(req.body, b"wasd");
    }

    #[test]
    fn chunked_roundtrip() {
        fn encode(data: &[u8], piece: usize) -> Vec<u8> {
            let mut out = Vec::new();
            for chunk in data.chunks(piece) {
                out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
                out.extend_from_slice(chunk);
                out.extend_from_slice(b"\r\n");
            }
            out.extend_from_slice(b"0\r\n\r\n");
            out
        }
        let payload = b"The quick brown fox jumps over the lazy dog";
        for piece in [1, 3, 7, 64] {
            match decode_chunked(&encode(payload, piece)) {
                ChunkProgress::Complete { data, .. } => assert_eq!(data, payload),
                _ => panic!("decode failed for piece size {piece}"),
            }
        }
    }

    #[test]
    fn reset_for_next_carries_pipelined_bytes() {
        let mut req = Request::new();
        req.append(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(req.is_complete());
        assert_eq!(req.target, "/a");
        req.reset_for_next();
        assert!(req.is_complete());
        assert_eq!(req.target, "/b");
        req.reset_for_next();
        assert!(!req.headers_complete);
    }

    #[test]
    fn keep_alive_defaults() {
        let req = parse_whole(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(req.wants_keep_alive());
        let req = parse_whole(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n");
        assert!(!req.wants_keep_alive());
        let req = parse_whole(b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n");
        assert!(req.wants_keep_alive());
    }
}
