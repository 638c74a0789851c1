use std::path::Path;

use super::headers::Headers;
use super::status::StatusCode;

/// In-memory response: status line, header map, cookie lines, body.
/// `Content-Length` tracks the body automatically.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub cookies: Vec<String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status: status.as_u16(),
            reason: status.reason().to_string(),
            headers: Headers::new(),
            cookies: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn set_status(&mut self, code: u16, reason: &str) {
        self.status = code;
        self.reason = reason.to_string();
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name, value);
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
        self.headers.insert("Content-Length", self.body.len().to_string());
    }

    /// Queues a `Set-Cookie` line. A negative `max_age` omits the
    /// attribute; cookies always carry `SameSite=Lax`.
    pub fn add_cookie(
        &mut self,
        name: &str,
        value: &str,
        max_age: i64,
        path: &str,
        http_only: bool,
        secure: bool,
    ) {
        let mut cookie = format!("{name}={value}");
        if !path.is_empty() {
            cookie.push_str(&format!("; Path={path}"));
        }
        if max_age >= 0 {
            cookie.push_str(&format!("; Max-Age={max_age}"));
        }
        if http_only {
            cookie.push_str("; HttpOnly");
        }
        if secure {
            cookie.push_str("; Secure");
        }
        cookie.push_str("; SameSite=Lax");
        self.cookies.push(cookie);
    }

    pub fn delete_cookie(&mut self, name: &str, path: &str) {
        self.cookies.push(format!("{name}=deleted; Path={path}; Max-Age=0"));
    }

    /// Content type by file extension; unknown extensions are served as
    /// opaque bytes.
    pub fn content_type_for(path: &Path) -> &'static str {
        match path.extension().and_then(|e| e.to_str()) {
            Some("html") | Some("htm") => "text/html",
            Some("css") => "text/css",
            Some("js") => "text/javascript",
            Some("json") => "application/json",
            Some("txt") => "text/plain",
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("png") => "image/png",
            Some("gif") => "image/gif",
            Some("pdf") => "application/pdf",
            Some("xml") => "application/xml",
            _ => "application/octet-stream",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_body_tracks_content_length() {
        let mut resp = Response::new(StatusCode::Ok);
        resp.set_body(&b"hello"[..]);
        assert_eq!(resp.headers.get("Content-Length"), Some("5"));
        resp.set_body(Vec::new());
        assert_eq!(resp.headers.get("Content-Length"), Some("0"));
    }

    #[test]
    fn cookie_attribute_order() {
        let mut resp = Response::new(StatusCode::Ok);
        resp.add_cookie("sid", "abc", 3600, "/", true, false);
        assert_eq!(resp.cookies[0], "sid=abc; Path=/; Max-Age=3600; HttpOnly; SameSite=Lax");
        resp.add_cookie("t", "1", -1, "", false, true);
        assert_eq!(resp.cookies[1], "t=1; Secure; SameSite=Lax");
    }

    #[test]
    fn mime_lookup() {
        assert_eq!(Response::content_type_for(Path::new("a/b.html")), "text/html");
        assert_eq!(Response::content_type_for(Path::new("x.png")), "image/png");
        assert_eq!(Response::content_type_for(Path::new("noext")), "application/octet-stream");
    }
}
