//! `multipart/form-data` decomposition, run on demand over a complete body.

use super::encoding::{base64_decode, quoted_printable_decode, url_decode};
use super::request::Request;

#[derive(Debug, Clone, Default)]
pub struct MultipartPart {
    pub name: String,
    /// Sanitized: path components stripped, control bytes removed,
    /// shell-hostile characters replaced with `_`.
    pub filename: String,
    pub content_type: String,
    pub transfer_encoding: String,
    pub data: Vec<u8>,
    pub is_file: bool,
}

impl Request {
    /// Decomposes the body into parts. Returns false when the request is
    /// not multipart, carries no boundary, or yields no parts. The result
    /// is cached; repeated calls are free.
    pub fn parse_multipart(&mut self) -> bool {
        if self.multipart_parsed {
            return !self.parts.is_empty();
        }
        self.multipart_parsed = true;
        let Some(boundary) = self.boundary() else {
            return false;
        };
        self.parts = split_parts(&self.body, &boundary);
        !self.parts.is_empty()
    }
}

/// Walks the body between `--<boundary>` markers; the sequence ends at
/// `--<boundary>--`. Part headers tolerate a bare-LF terminator.
pub fn split_parts(body: &[u8], boundary: &str) -> Vec<MultipartPart> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let mut parts = Vec::new();

    let Some(first) = twoway::find_bytes(body, delimiter) else {
        return parts;
    };
    let mut pos = first;
    loop {
        pos += delimiter.len();
        if body.get(pos..pos + 2) == Some(&b"--"[..]) {
            break;
        }
        if body.get(pos) == Some(&b'\r') {
            pos += 1;
        }
        if body.get(pos) == Some(&b'\n') {
            pos += 1;
        }

        let (header_len, sep_len) = match twoway::find_bytes(&body[pos..], b"\r\n\r\n") {
            Some(i) => (i, 4),
            None => match twoway::find_bytes(&body[pos..], b"\n\n") {
                Some(i) => (i, 2),
                None => break,
            },
        };
        let header_block = &body[pos..pos + header_len];
        let content_start = pos + header_len + sep_len;

        let Some(rel) = twoway::find_bytes(&body[content_start..], delimiter) else {
            break;
        };
        let next_boundary = content_start + rel;
        let mut content_end = next_boundary;
        if content_end >= 2 && &body[content_end - 2..content_end] == b"\r\n" {
            content_end -= 2;
        } else if content_end >= 1 && body[content_end - 1] == b'\n' {
            content_end -= 1;
        }

        let mut part = parse_part_headers(header_block);
        part.data = decode_part_data(&body[content_start..content_end.max(content_start)], &part.transfer_encoding);
        if part.is_file && part.content_type.is_empty() {
            part.content_type = "application/octet-stream".to_string();
        }
        parts.push(part);

        pos = next_boundary;
    }
    parts
}

fn parse_part_headers(block: &[u8]) -> MultipartPart {
    let mut part = MultipartPart::default();
    let text = String::from_utf8_lossy(block);
    for line in text.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-disposition") {
            let (pname, filename) = parse_content_disposition(value);
            part.name = pname;
            part.filename = filename;
            part.is_file = !part.filename.is_empty();
        } else if name.eq_ignore_ascii_case("content-type") {
            // Mime type only, parameters dropped.
            part.content_type = value.split(';').next().unwrap_or("").trim().to_string();
        } else if name.eq_ignore_ascii_case("content-transfer-encoding") {
            part.transfer_encoding = value.to_ascii_lowercase();
        }
    }
    part
}

/// Extracts `name` and `filename` parameters, honoring RFC 5987
/// `filename*=charset'lang'pct-encoded` when no plain filename is given.
fn parse_content_disposition(value: &str) -> (String, String) {
    let mut name = String::new();
    let mut filename = String::new();
    let mut filename_star = String::new();
    for param in value.split(';') {
        let Some((key, val)) = param.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let val = unquote(val.trim());
        match key.as_str() {
            "name" => name = val,
            "filename" => filename = val,
            "filename*" => filename_star = val,
            _ => {}
        }
    }
    if filename.is_empty() && !filename_star.is_empty() {
        // charset'language'encoded-value
        let mut fields = filename_star.splitn(3, '\'');
        let (_charset, _lang) = (fields.next(), fields.next());
        if let Some(encoded) = fields.next() {
            filename = url_decode(encoded);
        }
    }
    if filename.contains('%') {
        filename = url_decode(&filename);
    }
    (name, sanitize_filename(&filename))
}

fn unquote(v: &str) -> String {
    let v = v
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| v.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(v);
    v.to_string()
}

/// Strips path components, drops control bytes, replaces characters that
/// are unsafe in stored filenames with `_`.
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or("");
    base.chars()
        .filter(|&c| c != '\0' && c != '\r' && c != '\n' && c as u32 >= 0x20)
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

fn decode_part_data(data: &[u8], transfer_encoding: &str) -> Vec<u8> {
    match transfer_encoding {
        "base64" => {
            let clean: Vec<u8> = data.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect();
            base64_decode(&clean)
        }
        "quoted-printable" => quoted_printable_decode(data),
        // "binary", "7bit", "8bit" and empty are verbatim.
        _ => data.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::request::Request;
    use super::{sanitize_filename, split_parts};

    fn form_request(content_type: &str, body: &[u8]) -> Request {
        let mut req = Request::new();
        req.append(
            format!(
                "POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
                body.len()
            )
            .as_bytes(),
        );
        req.append(body);
        req
    }

    #[test]
    fn single_file_part() {
        let body = b"--XYZ\r\n\
            Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\
            Content-Type: text/plain\r\n\r\n\
            abc\r\n--XYZ--\r\n";
        let mut req = form_request("multipart/form-data; boundary=XYZ", body);
        assert!(req.parse_multipart());
        let parts = req.parts();
        assert_eq!(parts.len(), 1);
        assert!(parts[0].is_file);
        assert_eq!(parts[0].name, "file");
        assert_eq!(parts[0].filename, "a.txt");
        assert_eq!(parts[0].content_type, "text/plain");
        assert_eq!(parts[0].data, b"abc");
    }

    #[test]
    fn quoted_boundary_and_trailing_params() {
        let mut req = form_request("multipart/form-data; boundary=\"XYZ\"; charset=utf-8", b"");
        assert_eq!(req.boundary().as_deref(), Some("XYZ"));
        assert!(!req.parse_multipart());
    }

    #[test]
    fn field_and_file_parts() {
        let body = b"--B\r\n\
            Content-Disposition: form-data; name=\"title\"\r\n\r\n\
            hello\r\n\
            --B\r\n\
            Content-Disposition: form-data; name=\"doc\"; filename=\"r.bin\"\r\n\r\n\
            \x00\x01\x02\r\n\
            --B--\r\n";
        let parts = split_parts(body, "B");
        assert_eq!(parts.len(), 2);
        assert!(!parts[0].is_file);
        assert_eq!(parts[0].data, b"hello");
        assert!(parts[1].is_file);
        assert_eq!(parts[1].data, b"\x00\x01\x02");
        assert_eq!(parts[1].content_type, "application/octet-stream");
    }

    #[test]
    fn lf_only_part_headers_are_tolerated() {
        let body = b"--B\r\nContent-Disposition: form-data; name=\"f\"; filename=\"x\"\n\ndata\r\n--B--";
        let parts = split_parts(body, "B");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].data, b"data");
    }

    #[test]
    fn base64_part_is_decoded_ignoring_whitespace() {
        let body = b"--B\r\n\
            Content-Disposition: form-data; name=\"f\"; filename=\"h.txt\"\r\n\
            Content-Transfer-Encoding: base64\r\n\r\n\
            aGVs\r\nbG8=\r\n\
            --B--";
        let parts = split_parts(body, "B");
        assert_eq!(parts[0].data, b"hello");
    }

    #[test]
    fn quoted_printable_part_is_decoded() {
        let body = b"--B\r\n\
            Content-Disposition: form-data; name=\"f\"\r\n\
            Content-Transfer-Encoding: quoted-printable\r\n\r\n\
            a=3Db\r\n\
            --B--";
        let parts = split_parts(body, "B");
        assert_eq!(parts[0].data, b"a=b");
    }

    #[test]
    fn rfc5987_filename_star() {
        let body = b"--B\r\n\
            Content-Disposition: form-data; name=\"f\"; filename*=UTF-8''%E4%B8%AD.txt\r\n\r\n\
            x\r\n--B--";
        let parts = split_parts(body, "B");
        assert_eq!(parts[0].filename, "中.txt");
    }

    #[test]
    fn filename_sanitization() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\boot.ini"), "boot.ini");
        assert_eq!(sanitize_filename("a<b>c?.txt"), "a_b_c_.txt");
        assert_eq!(sanitize_filename("evil\r\n\x01.sh"), "evil.sh");
        let clean = sanitize_filename("we*ird:na|me.bin");
        assert!(clean.bytes().all(|b| b >= 0x20 && b != b'/' && b != b'\\'));
    }
}
