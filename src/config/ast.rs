use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::http::Method;

pub const DEFAULT_BODY_LIMIT: u64 = 1_048_576;

#[derive(Debug, Clone)]
pub struct Config {
    pub servers: Vec<Server>,
}

impl Config {
    /// Virtual-host selection: the hostname portion of the Host header
    /// (everything before `:`) is matched against the names of servers
    /// bound to the accepting port; on no exact match the first server
    /// registered on that port is the default.
    pub fn find_server(&self, port: u16, host_header: Option<&str>) -> usize {
        let hostname = host_header
            .map(|h| h.split(':').next().unwrap_or(""))
            .unwrap_or("");
        let mut first_on_port = None;
        for (i, srv) in self.servers.iter().enumerate() {
            if !srv.listens_on(port) {
                continue;
            }
            if first_on_port.is_none() {
                first_on_port = Some(i);
            }
            if !hostname.is_empty() && srv.server_names.iter().any(|n| n == hostname) {
                return i;
            }
        }
        first_on_port.unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct Server {
    pub listen: Vec<SocketAddr>,
    pub server_names: Vec<String>,
    pub root: PathBuf,
    pub index: String,
    pub client_max_body_size: u64,
    pub error_pages: HashMap<u16, String>,
    pub locations: Vec<Location>,
}

impl Server {
    pub fn listens_on(&self, port: u16) -> bool {
        self.listen.iter().any(|a| a.port() == port)
    }

    pub fn primary_name(&self) -> &str {
        self.server_names.first().map(String::as_str).unwrap_or("_")
    }

    /// Longest-prefix location match; None means default policy
    /// (GET allowed, no CGI).
    pub fn find_location(&self, path: &str) -> Option<&Location> {
        let mut best: Option<&Location> = None;
        for loc in &self.locations {
            if path.starts_with(&loc.path) && best.is_none_or(|b| loc.path.len() > b.path.len()) {
                best = Some(loc);
            }
        }
        best
    }

    /// Effective POST body limit: the location override when non-zero,
    /// else the server default.
    pub fn body_limit(&self, location: Option<&Location>) -> u64 {
        match location {
            Some(loc) if loc.client_max_body_size > 0 => loc.client_max_body_size,
            _ => self.client_max_body_size,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Location {
    pub path: String,
    pub root: Option<PathBuf>,
    pub index: Option<String>,
    /// Empty means every supported method passes.
    pub methods: Vec<Method>,
    pub autoindex: bool,
    pub upload_store: Option<PathBuf>,
    /// File extension (with leading dot) to interpreter path; an empty
    /// interpreter means the script is executed directly.
    pub cgi: HashMap<String, PathBuf>,
    pub client_max_body_size: u64,
    pub redirect: Option<(u16, String)>,
}

impl Location {
    pub fn allows(&self, method: Method) -> bool {
        self.methods.is_empty() || self.methods.contains(&method)
    }
}
