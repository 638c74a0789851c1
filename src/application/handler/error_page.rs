use std::fs;
use std::path::PathBuf;

use crate::config::Server;
use crate::http::{Response, StatusCode};

/// Error response for a virtual host: the configured custom page when one
/// exists, otherwise a small built-in HTML body.
pub fn error_response(status: StatusCode, server: &Server) -> Response {
    let code = status.as_u16();
    let mut resp = Response::new(status);
    resp.set_header("Content-Type", "text/html");

    if let Some(page) = server.error_pages.get(&code) {
        let path = PathBuf::from(page);
        let path = if path.is_absolute() {
            path
        } else {
            server.root.join(page.trim_start_matches('/'))
        };
        if let Ok(bytes) = fs::read(&path) {
            resp.set_body(bytes);
            return resp;
        }
    }

    let reason = status.reason();
    resp.set_body(
        format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<title>{code} {reason}</title>\n</head>\n\
             <body>\n<h1>{code} {reason}</h1>\n</body>\n</html>"
        )
        .into_bytes(),
    );
    resp
}
