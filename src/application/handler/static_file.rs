use std::fs;
use std::path::Path;

use crate::http::{Response, StatusCode};

/// Reads a regular file into a 200 response with the content type
/// derived from the extension.
pub fn serve_file(path: &Path) -> Result<Response, StatusCode> {
    let bytes = fs::read(path).map_err(|_| StatusCode::InternalServerError)?;
    let mut resp = Response::new(StatusCode::Ok);
    resp.set_header("Content-Type", Response::content_type_for(path));
    resp.set_body(bytes);
    Ok(resp)
}

/// Directory request: serve the index file when present, else a listing
/// when autoindex is enabled, else 404.
pub fn serve_directory(
    dir: &Path,
    url_path: &str,
    index_name: &str,
    autoindex: bool,
) -> Result<Response, StatusCode> {
    let index_path = dir.join(index_name);
    if index_path.is_file() {
        return serve_file(&index_path);
    }
    if autoindex {
        return directory_listing(dir, url_path);
    }
    Err(StatusCode::NotFound)
}

/// HTML listing of directory entries: `..` is kept, `.` dropped,
/// directories marked with a trailing slash.
fn directory_listing(dir: &Path, url_path: &str) -> Result<Response, StatusCode> {
    let mut names: Vec<String> = Vec::new();
    let entries = fs::read_dir(dir).map_err(|_| StatusCode::InternalServerError)?;
    for entry in entries.flatten() {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();

    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n");
    html.push_str(&format!("<title>Index of {url_path}</title>\n"));
    html.push_str("<style>\n");
    html.push_str("body { font-family: Arial, sans-serif; margin: 40px; }\n");
    html.push_str("h1 { color: #333; }\n");
    html.push_str("ul { list-style: none; padding: 0; }\n");
    html.push_str("li { padding: 5px; }\n");
    html.push_str("a { text-decoration: none; color: #0066cc; }\n");
    html.push_str("a:hover { text-decoration: underline; }\n");
    html.push_str("</style>\n</head>\n<body>\n");
    html.push_str(&format!("<h1>Index of {url_path}</h1>\n<ul>\n"));
    html.push_str("<li><a href=\"../\">../</a></li>\n");
    for name in &names {
        html.push_str(&format!("<li><a href=\"{name}\">{name}</a></li>\n"));
    }
    html.push_str("</ul>\n</body>\n</html>");

    let mut resp = Response::new(StatusCode::Ok);
    resp.set_header("Content-Type", "text/html");
    resp.set_body(html.into_bytes());
    Ok(resp)
}
