use std::fs;
use std::path::{Path, PathBuf};

use rand::Rng;

use crate::http::{Request, Response, StatusCode};

/// Multipart POST: every file part is persisted under the upload
/// directory, colliding names get a numeric suffix, and the reply is a
/// 201 JSON manifest of the stored files.
pub fn handle_multipart(req: &mut Request, upload_dir: &Path) -> Result<Response, StatusCode> {
    if !req.parse_multipart() {
        let detail = match req.boundary() {
            None => "No boundary found in Content-Type header",
            Some(_) => "Boundary parsing failed. Check data format.",
        };
        return Ok(json_error(
            StatusCode::BadRequest,
            &format!("Failed to parse multipart data: {detail}"),
        ));
    }

    fs::create_dir_all(upload_dir).map_err(|_| StatusCode::InternalServerError)?;

    let mut saved: Vec<(String, usize, String)> = Vec::new();
    // Iterate over an owned copy of the metadata so the request stays
    // borrowed immutably while files are written.
    let parts: Vec<_> = req
        .parts()
        .iter()
        .filter(|p| p.is_file && !p.filename.is_empty() && !p.data.is_empty())
        .cloned()
        .collect();
    for part in &parts {
        let target = unique_target_path(upload_dir, &part.filename);
        fs::write(&target, &part.data).map_err(|_| StatusCode::InternalServerError)?;
        let stored_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| part.filename.clone());
        saved.push((stored_name, part.data.len(), part.content_type.clone()));
    }

    if saved.is_empty() {
        return Ok(json_error(
            StatusCode::BadRequest,
            "No files found in upload. Make sure the form field is a file input.",
        ));
    }

    let total_size: usize = saved.iter().map(|(_, size, _)| size).sum();
    let mut files = String::new();
    for (i, (name, size, mime)) in saved.iter().enumerate() {
        if i > 0 {
            files.push(',');
        }
        files.push_str(&format!(
            "{{\"name\":\"{}\",\"size\":{size},\"type\":\"{}\"}}",
            escape_json(name),
            escape_json(mime)
        ));
    }
    let body = format!(
        "{{\"status\":\"success\",\"message\":\"{} file(s) uploaded\",\"files\":[{files}],\"total_size\":{total_size}}}",
        saved.len()
    );

    let mut resp = Response::new(StatusCode::Created);
    resp.set_header("Content-Type", "application/json");
    resp.set_body(body.into_bytes());
    Ok(resp)
}

/// Non-multipart POST: the raw body is stored under a generated name
/// with an extension inferred from the request content type.
pub fn handle_raw(req: &Request, upload_dir: &Path) -> Result<Response, StatusCode> {
    if req.body.is_empty() {
        return Ok(json_error(StatusCode::BadRequest, "Empty request body"));
    }
    fs::create_dir_all(upload_dir).map_err(|_| StatusCode::InternalServerError)?;

    let content_type = req.header("Content-Type").unwrap_or("");
    let filename = format!("{}{}", generate_filename(), extension_for(content_type));
    fs::write(upload_dir.join(&filename), &req.body).map_err(|_| StatusCode::InternalServerError)?;

    let mut resp = Response::new(StatusCode::Created);
    resp.set_header("Content-Type", "application/json");
    resp.set_body(
        format!("{{\"status\":\"success\",\"message\":\"File uploaded as {filename}\"}}").into_bytes(),
    );
    Ok(resp)
}

/// Picks a non-clobbering path: `name.ext`, then `name_1.ext`,
/// `name_2.ext`, ...
pub fn unique_target_path(dir: &Path, filename: &str) -> PathBuf {
    let mut candidate = dir.join(filename);
    let (stem, ext) = match filename.rfind('.') {
        Some(dot) if dot > 0 => (&filename[..dot], &filename[dot..]),
        _ => (filename, ""),
    };
    let mut suffix = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{stem}_{suffix}{ext}"));
        suffix += 1;
    }
    candidate
}

fn generate_filename() -> String {
    let stamp = chrono::Utc::now().timestamp();
    let tag: u32 = rand::thread_rng().gen_range(0..10_000);
    format!("upload_{stamp}_{tag}")
}

fn extension_for(content_type: &str) -> &'static str {
    if content_type.contains("text/") {
        ".txt"
    } else if content_type.contains("application/json") {
        ".json"
    } else if content_type.contains("jpeg") || content_type.contains("jpg") {
        ".jpg"
    } else if content_type.contains("png") {
        ".png"
    } else if content_type.contains("gif") {
        ".gif"
    } else {
        ".bin"
    }
}

fn escape_json(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn json_error(status: StatusCode, message: &str) -> Response {
    let mut resp = Response::new(status);
    resp.set_header("Content-Type", "application/json");
    resp.set_body(
        format!("{{\"status\":\"error\",\"message\":\"{}\"}}", escape_json(message)).into_bytes(),
    );
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Request;
    use std::fs;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("webserv-upload-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn multipart_request(boundary: &str, body: &[u8]) -> Request {
        let mut req = Request::new();
        req.append(
            format!(
                "POST /upload HTTP/1.1\r\nHost: localhost\r\n\
                 Content-Type: multipart/form-data; boundary={boundary}\r\n\
                 Content-Length: {}\r\n\r\n",
                body.len()
            )
            .as_bytes(),
        );
        req.append(body);
        req
    }

    #[test]
    fn stores_file_part_and_reports_manifest() {
        let dir = scratch_dir("manifest");
        let body = b"--XYZ\r\n\
            Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\
            Content-Type: text/plain\r\n\r\n\
            abc\r\n--XYZ--\r\n";
        let mut req = multipart_request("XYZ", body);
        let resp = handle_multipart(&mut req, &dir).unwrap();
        assert_eq!(resp.status, 201);
        let json = String::from_utf8(resp.body).unwrap();
        assert!(json.contains("\"name\":\"a.txt\""));
        assert!(json.contains("\"size\":3"));
        assert!(json.contains("\"type\":\"text/plain\""));
        assert_eq!(fs::read(dir.join("a.txt")).unwrap(), b"abc");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn collision_gets_numeric_suffix() {
        let dir = scratch_dir("suffix");
        fs::write(dir.join("a.txt"), "old").unwrap();
        assert_eq!(unique_target_path(&dir, "a.txt"), dir.join("a_1.txt"));
        fs::write(dir.join("a_1.txt"), "old").unwrap();
        assert_eq!(unique_target_path(&dir, "a.txt"), dir.join("a_2.txt"));
        assert_eq!(unique_target_path(&dir, "noext"), dir.join("noext"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn upload_without_file_parts_is_rejected() {
        let dir = scratch_dir("nofile");
        let body = b"--B\r\nContent-Disposition: form-data; name=\"t\"\r\n\r\nvalue\r\n--B--\r\n";
        let mut req = multipart_request("B", body);
        let resp = handle_multipart(&mut req, &dir).unwrap();
        assert_eq!(resp.status, 400);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn raw_post_is_persisted_with_inferred_extension() {
        let dir = scratch_dir("raw");
        let mut req = Request::new();
        req.append(
            b"POST /drop HTTP/1.1\r\nHost: x\r\nContent-Type: application/json\r\nContent-Length: 2\r\n\r\n{}",
        );
        let resp = handle_raw(&req, &dir).unwrap();
        assert_eq!(resp.status, 201);
        let stored: Vec<_> = fs::read_dir(&dir).unwrap().flatten().collect();
        assert_eq!(stored.len(), 1);
        let name = stored[0].file_name().to_string_lossy().into_owned();
        assert!(name.starts_with("upload_") && name.ends_with(".json"), "{name}");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_raw_body_is_rejected() {
        let dir = scratch_dir("empty");
        let mut req = Request::new();
        req.append(b"POST /drop HTTP/1.1\r\nHost: x\r\n\r\n");
        let resp = handle_raw(&req, &dir).unwrap();
        assert_eq!(resp.status, 400);
        let _ = fs::remove_dir_all(&dir);
    }
}
