use super::headers::Headers;
use super::multipart::MultipartPart;

/// One HTTP request, owned by exactly one connection. Socket reads are
/// appended to `raw` and the parser advances over it; between pipelined
/// requests the connection resets this in place.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub content_length: usize,
    pub headers_complete: bool,
    pub body_complete: bool,
    pub is_chunked: bool,
    pub parse_error: bool,
    pub error_code: u16,
    pub(super) raw: Vec<u8>,
    pub(super) header_end: usize,
    pub(super) consumed: usize,
    pub(super) body_received: usize,
    pub(super) parts: Vec<MultipartPart>,
    pub(super) multipart_parsed: bool,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards everything, including unconsumed raw bytes.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Resets for the next pipelined request on a keep-alive connection:
    /// bytes past the consumed request are carried over and re-parsed.
    pub fn reset_for_next(&mut self) {
        let cut = self.consumed.min(self.raw.len());
        let leftover = self.raw.split_off(cut);
        *self = Self::default();
        if !leftover.is_empty() {
            self.append(&leftover);
        }
    }

    pub fn is_complete(&self) -> bool {
        self.headers_complete && self.body_complete
    }

    /// Body bytes received so far: the decoded body once framing is
    /// complete, the running chunked total while it is not. Lets size
    /// limits apply before an oversized stream is fully buffered.
    pub fn body_len_so_far(&self) -> usize {
        self.body.len().max(self.body_received)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Request target without the query string.
    pub fn path(&self) -> &str {
        match self.target.split_once('?') {
            Some((p, _)) => p,
            None => &self.target,
        }
    }

    pub fn query(&self) -> &str {
        match self.target.split_once('?') {
            Some((_, q)) => q,
            None => "",
        }
    }

    pub fn wants_keep_alive(&self) -> bool {
        let conn = self.headers.get("Connection").map(str::to_ascii_lowercase);
        if self.version == "HTTP/1.0" {
            matches!(conn.as_deref(), Some(v) if v.contains("keep-alive"))
        } else {
            !matches!(conn.as_deref(), Some(v) if v.contains("close"))
        }
    }

    pub fn is_multipart(&self) -> bool {
        self.headers
            .get("Content-Type")
            .is_some_and(|ct| ct.contains("multipart/form-data"))
    }

    /// Boundary parameter of a `multipart/form-data` content type, with
    /// surrounding quotes stripped and trailing parameters removed.
    pub fn boundary(&self) -> Option<String> {
        let ct = self.headers.get("Content-Type")?;
        if !ct.contains("multipart/form-data") {
            return None;
        }
        let rest = ct.split_once("boundary=")?.1.trim();
        let boundary = match rest.strip_prefix('"') {
            Some(quoted) => quoted.split('"').next().unwrap_or(""),
            None => rest.split(';').next().unwrap_or("").trim(),
        };
        if boundary.is_empty() {
            None
        } else {
            Some(boundary.to_string())
        }
    }

    pub fn parts(&self) -> &[MultipartPart] {
        &self.parts
    }
}
