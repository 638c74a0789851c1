use crate::http::response::Response;

/// Wire form: status line, `Content-Length` and `Connection` (when not
/// already present), headers in insertion order, cookie lines, blank
/// line, body. Responses are always `Content-Length`-framed.
pub fn serialize_response(resp: &Response, keep_alive: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(256 + resp.body.len());
    out.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", resp.status, resp.reason).as_bytes());

    if !resp.headers.contains_key("Content-Length") {
        out.extend_from_slice(format!("Content-Length: {}\r\n", resp.body.len()).as_bytes());
    }
    if !resp.headers.contains_key("Connection") {
        if keep_alive {
            out.extend_from_slice(b"Connection: keep-alive\r\n");
        } else {
            out.extend_from_slice(b"Connection: close\r\n");
        }
    }
    for (name, value) in resp.headers.iter() {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    for cookie in &resp.cookies {
        out.extend_from_slice(format!("Set-Cookie: {cookie}\r\n").as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&resp.body);
    out
}

#[cfg(test)]
mod tests {
    use super::serialize_response;
    use crate::http::{Response, StatusCode};

    #[test]
    fn content_length_matches_body() {
        let mut resp = Response::new(StatusCode::Ok);
        resp.set_body(&b"0123456789"[..]);
        let wire = serialize_response(&resp, true);
        let text = String::from_utf8(wire).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 10\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));
        assert!(text.ends_with("\r\n\r\n0123456789"));
    }

    #[test]
    fn explicit_connection_close_wins() {
        let mut resp = Response::new(StatusCode::PayloadTooLarge);
        resp.set_header("Connection", "close");
        let text = String::from_utf8(serialize_response(&resp, true)).unwrap();
        assert_eq!(text.matches("Connection:").count(), 1);
        assert!(text.contains("Connection: close\r\n"));
    }

    #[test]
    fn cookie_lines_follow_headers() {
        let mut resp = Response::new(StatusCode::Ok);
        resp.set_header("Content-Type", "text/html");
        resp.add_cookie("a", "b", -1, "/", false, false);
        let text = String::from_utf8(serialize_response(&resp, false)).unwrap();
        let ct = text.find("Content-Type:").unwrap();
        let sc = text.find("Set-Cookie: a=b; Path=/; SameSite=Lax\r\n").unwrap();
        assert!(ct < sc);
    }
}
