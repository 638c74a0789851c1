//! Request dispatch for one virtual host: location policy, method gating,
//! body-size enforcement, then delegation to the static handlers or the
//! CGI coordinator.

use std::path::PathBuf;

use crate::application::handler::cgi::{self, CgiCoordinator};
use crate::application::handler::{delete, error_page, static_file, upload};
use crate::config::{Location, Server};
use crate::http::{Method, Request, Response, StatusCode};

pub enum Dispatch {
    Respond(Response),
    /// The request selected a CGI script; the event loop launches the
    /// child and drives the pipes.
    Cgi(Box<CgiCoordinator>),
}

pub fn handle(server: &Server, port: u16, req: &mut Request) -> Dispatch {
    let location = server.find_location(req.path());

    if let Some((code, url)) = location.and_then(|l| l.redirect.as_ref()) {
        if *code > 0 && !url.is_empty() {
            return Dispatch::Respond(redirect(*code, url));
        }
    }

    let Some(method) = Method::parse(&req.method) else {
        return respond_error(StatusCode::MethodNotAllowed, server);
    };
    let allowed = match location {
        Some(loc) => loc.allows(method),
        // Default policy with no matching location: GET only, no CGI.
        None => method == Method::Get,
    };
    if !allowed {
        return respond_error(StatusCode::MethodNotAllowed, server);
    }

    if req.path().split('/').any(|seg| seg == "..") {
        return respond_error(StatusCode::Forbidden, server);
    }

    if method == Method::Post && req.body.len() as u64 > server.body_limit(location) {
        return respond_error(StatusCode::PayloadTooLarge, server);
    }

    if let Some(loc) = location {
        for (ext, interpreter) in &loc.cgi {
            if !cgi::is_cgi_target(req.path(), ext) {
                continue;
            }
            let (doc_root, url_path) = cgi_mapping(server, loc, req.path());
            let Some(script) = cgi::script_path_for(&url_path, &doc_root, ext) else {
                continue;
            };
            let interpreter = if interpreter.as_os_str().is_empty() {
                None
            } else {
                Some(interpreter.clone())
            };
            let coordinator = CgiCoordinator::from_request(
                req,
                script,
                interpreter,
                doc_root,
                server.primary_name().to_string(),
                port,
            );
            return Dispatch::Cgi(Box::new(coordinator));
        }
    }

    let result = match method {
        Method::Get => serve_static(server, location, req),
        Method::Post => {
            let dir = upload_dir(server, location);
            if req.is_multipart() {
                upload::handle_multipart(req, &dir)
            } else {
                upload::handle_raw(req, &dir)
            }
        }
        Method::Delete => {
            let target = delete_target(server, location, req.path());
            delete::handle_delete(&target, &server.root, &upload_dir(server, location))
        }
    };
    match result {
        Ok(resp) => Dispatch::Respond(resp),
        Err(status) => respond_error(status, server),
    }
}

fn serve_static(
    server: &Server,
    location: Option<&Location>,
    req: &Request,
) -> Result<Response, StatusCode> {
    let path = map_path(server, location, req.path());
    if !path.exists() {
        return Err(StatusCode::NotFound);
    }
    if path.is_dir() {
        let index = location
            .and_then(|l| l.index.as_deref())
            .unwrap_or(&server.index);
        let autoindex = location.is_some_and(|l| l.autoindex);
        return static_file::serve_directory(&path, req.path(), index, autoindex);
    }
    static_file::serve_file(&path)
}

/// URI to filesystem mapping. A location with its own root replaces the
/// matched prefix; otherwise the URI is joined onto the server root.
pub fn map_path(server: &Server, location: Option<&Location>, uri: &str) -> PathBuf {
    if let Some(loc) = location {
        if let Some(root) = &loc.root {
            let rel = strip_prefix(uri, &loc.path);
            return root.join(rel.trim_start_matches('/'));
        }
    }
    server.root.join(uri.trim_start_matches('/'))
}

fn cgi_mapping(server: &Server, loc: &Location, uri: &str) -> (PathBuf, String) {
    match &loc.root {
        Some(root) => (root.clone(), strip_prefix(uri, &loc.path)),
        None => (server.root.clone(), uri.to_string()),
    }
}

fn strip_prefix(uri: &str, prefix: &str) -> String {
    let rest = uri.strip_prefix(prefix).unwrap_or(uri);
    if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{rest}")
    }
}

pub fn upload_dir(server: &Server, location: Option<&Location>) -> PathBuf {
    location
        .and_then(|l| l.upload_store.clone())
        .unwrap_or_else(|| server.root.join("uploads"))
}

/// DELETE targets resolve against the upload store when the location has
/// one, else through the regular path mapping.
fn delete_target(server: &Server, location: Option<&Location>, uri: &str) -> PathBuf {
    if let Some(loc) = location {
        if let Some(store) = &loc.upload_store {
            let rel = strip_prefix(uri, &loc.path);
            return store.join(rel.trim_start_matches('/'));
        }
    }
    map_path(server, location, uri)
}

fn respond_error(status: StatusCode, server: &Server) -> Dispatch {
    Dispatch::Respond(error_page::error_response(status, server))
}

fn redirect(code: u16, url: &str) -> Response {
    let reason = match code {
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        _ => "Redirect",
    };
    let mut resp = Response::new(StatusCode::Found);
    resp.set_status(code, reason);
    resp.set_header("Location", url);
    resp.set_header("Content-Type", "text/html");
    resp.set_body(
        format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<title>{code} {reason}</title>\n</head>\n<body>\n\
             <h1>{code} {reason}</h1>\n<p>Redirecting to <a href=\"{url}\">{url}</a></p>\n\
             </body>\n</html>"
        )
        .into_bytes(),
    );
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_config;
    use crate::http::Request;
    use std::fs;
    use std::path::Path;

    fn request(line: &str) -> Request {
        let mut req = Request::new();
        req.append(format!("{line}\r\nHost: localhost\r\n\r\n").as_bytes());
        assert!(req.is_complete(), "test request must parse");
        req
    }

    fn respond(server: &Server, req: &mut Request) -> Response {
        match handle(server, 8080, req) {
            Dispatch::Respond(resp) => resp,
            Dispatch::Cgi(_) => panic!("unexpected CGI dispatch"),
        }
    }

    #[test]
    fn unknown_method_is_405() {
        let cfg = parse_config("server { listen 8080; location / { } }", Path::new(".")).unwrap();
        let resp = respond(&cfg.servers[0], &mut request("PATCH / HTTP/1.1"));
        assert_eq!(resp.status, 405);
    }

    #[test]
    fn method_gating_follows_location_list() {
        let conf = r#"
            server {
                listen 8080;
                location /ro { methods GET; }
            }
        "#;
        let cfg = parse_config(conf, Path::new(".")).unwrap();
        let resp = respond(&cfg.servers[0], &mut request("DELETE /ro/file HTTP/1.1"));
        assert_eq!(resp.status, 405);
    }

    #[test]
    fn default_policy_is_get_only() {
        let cfg = parse_config("server { listen 8080; }", Path::new(".")).unwrap();
        let mut req = Request::new();
        req.append(b"POST /x HTTP/1.1\r\nHost: l\r\nContent-Length: 1\r\n\r\na");
        let resp = respond(&cfg.servers[0], &mut req);
        assert_eq!(resp.status, 405);
    }

    #[test]
    fn redirect_location_short_circuits() {
        let conf = r#"
            server {
                listen 8080;
                location /old { redirect 301 /new; }
            }
        "#;
        let cfg = parse_config(conf, Path::new(".")).unwrap();
        let resp = respond(&cfg.servers[0], &mut request("GET /old/page HTTP/1.1"));
        assert_eq!(resp.status, 301);
        assert_eq!(resp.headers.get("Location"), Some("/new"));
    }

    #[test]
    fn oversize_post_body_is_413() {
        let conf = r#"
            server {
                listen 8080;
                client_max_body_size 4;
                location / { methods GET POST; }
            }
        "#;
        let cfg = parse_config(conf, Path::new(".")).unwrap();
        let mut req = Request::new();
        req.append(b"POST /up HTTP/1.1\r\nHost: l\r\nContent-Length: 8\r\n\r\n12345678");
        let resp = respond(&cfg.servers[0], &mut req);
        assert_eq!(resp.status, 413);
    }

    #[test]
    fn dotdot_segments_are_forbidden() {
        let cfg = parse_config("server { listen 8080; }", Path::new(".")).unwrap();
        let resp = respond(&cfg.servers[0], &mut request("GET /../etc/passwd HTTP/1.1"));
        assert_eq!(resp.status, 403);
    }

    #[test]
    fn missing_file_is_404() {
        let cfg = parse_config("server { listen 8080; root /nonexistent-root; }", Path::new(".")).unwrap();
        let resp = respond(&cfg.servers[0], &mut request("GET /nope.html HTTP/1.1"));
        assert_eq!(resp.status, 404);
    }

    #[test]
    fn get_serves_file_from_location_root() {
        let dir = std::env::temp_dir().join(format!("webserv-dispatch-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("hello.txt"), "hi").unwrap();
        let conf = format!(
            "server {{ listen 8080; location /files {{ root \"{}\"; }} }}",
            dir.display()
        );
        let cfg = parse_config(&conf, Path::new(".")).unwrap();
        let resp = respond(&cfg.servers[0], &mut request("GET /files/hello.txt HTTP/1.1"));
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"hi");
        assert_eq!(resp.headers.get("Content-Type"), Some("text/plain"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn cgi_extension_routes_to_coordinator() {
        let conf = r#"
            server {
                listen 8080;
                location /cgi-bin { cgi .py /usr/bin/python3; }
            }
        "#;
        let cfg = parse_config(conf, Path::new(".")).unwrap();
        let mut req = request("GET /cgi-bin/app.py?q=1 HTTP/1.1");
        assert!(matches!(handle(&cfg.servers[0], 8080, &mut req), Dispatch::Cgi(_)));
    }

    #[test]
    fn path_mapping() {
        let conf = r#"
            server {
                listen 8080;
                root /srv/www;
                location /assets { root /srv/static; }
            }
        "#;
        let cfg = parse_config(conf, Path::new("/")).unwrap();
        let server = &cfg.servers[0];
        let loc = server.find_location("/assets/app.css");
        assert_eq!(
            map_path(server, loc, "/assets/app.css"),
            Path::new("/srv/static/app.css")
        );
        assert_eq!(
            map_path(server, None, "/pages/a.html"),
            Path::new("/srv/www/pages/a.html")
        );
    }
}
