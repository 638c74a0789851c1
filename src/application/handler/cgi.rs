//! CGI/1.1 coordinator: child launch, environment assembly, output-header
//! parsing. The event loop owns the pipes and drives the exchange; the
//! functions here never call back into connection state and never block
//! in the parent.

use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::core::net::socket::set_nonblocking;
use crate::core::net::Fd;
use crate::http::{Request, Response, StatusCode};

pub const SERVER_SOFTWARE: &str = "webserv/1.0";

#[derive(Debug, thiserror::Error)]
pub enum CgiError {
    #[error("script not found: {}", .0.display())]
    ScriptNotFound(PathBuf),
    #[error("interpreter not found: {}", .0.display())]
    InterpreterNotFound(PathBuf),
    #[error("pipe: {0}")]
    Pipe(io::Error),
    #[error("fork: {0}")]
    Fork(io::Error),
}

/// Handle for a forked child: both retained pipe ends (non-blocking) and
/// an identifier sufficient to signal and wait. Ownership transfers into
/// the connection's CGI session on successful launch.
pub struct CgiChild {
    pub stdin: Fd,
    pub stdout: Fd,
    pub pid: libc::pid_t,
}

pub struct CgiCoordinator {
    script_path: PathBuf,
    interpreter: Option<PathBuf>,
    document_root: PathBuf,
    script_name: String,
    query_string: String,
    path_info: String,
    method: String,
    content_type: String,
    content_length: usize,
    server_name: String,
    server_port: u16,
    http_headers: Vec<(String, String)>,
}

impl CgiCoordinator {
    pub fn from_request(
        req: &Request,
        script_path: PathBuf,
        interpreter: Option<PathBuf>,
        document_root: PathBuf,
        server_name: String,
        server_port: u16,
    ) -> Self {
        let script_name = req.path().to_string();
        let query_string = req.query().to_string();
        let path_info = extract_path_info(&script_name, &script_path);

        // Every request header with a non-empty value is forwarded as
        // HTTP_<NAME>, dashes mapped to underscores.
        let http_headers = req
            .headers
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| {
                let name: String = k
                    .chars()
                    .map(|c| if c == '-' { '_' } else { c.to_ascii_uppercase() })
                    .collect();
                (format!("HTTP_{name}"), v.to_string())
            })
            .collect();

        Self {
            script_path,
            interpreter,
            document_root,
            script_name,
            query_string,
            path_info,
            method: req.method.clone(),
            content_type: req.header("Content-Type").unwrap_or("").to_string(),
            content_length: req.body.len(),
            server_name,
            server_port,
            http_headers,
        }
    }

    /// RFC 3875 environment. `REDIRECT_STATUS` is unconditional because
    /// php-cgi builds with force-cgi-redirect refuse to run without it.
    pub fn build_env(&self) -> Vec<String> {
        let script_filename =
            fs::canonicalize(&self.script_path).unwrap_or_else(|_| self.script_path.clone());
        let mut vars = vec![
            "GATEWAY_INTERFACE=CGI/1.1".to_string(),
            "SERVER_PROTOCOL=HTTP/1.1".to_string(),
            format!("SERVER_SOFTWARE={SERVER_SOFTWARE}"),
            "REDIRECT_STATUS=200".to_string(),
            format!("REQUEST_METHOD={}", self.method),
            format!("QUERY_STRING={}", self.query_string),
            format!("SCRIPT_NAME={}", self.script_name),
            format!("SCRIPT_FILENAME={}", script_filename.display()),
            format!("PATH_INFO={}", self.path_info),
            format!("PATH_TRANSLATED={}{}", self.document_root.display(), self.path_info),
            format!("DOCUMENT_ROOT={}", self.document_root.display()),
            format!("SERVER_NAME={}", self.server_name),
            format!("SERVER_PORT={}", self.server_port),
        ];
        if self.method == "POST" && self.content_length > 0 {
            if !self.content_type.is_empty() {
                vars.push(format!("CONTENT_TYPE={}", self.content_type));
            }
            vars.push(format!("CONTENT_LENGTH={}", self.content_length));
        }
        for (name, value) in &self.http_headers {
            vars.push(format!("{name}={value}"));
        }
        if let Ok(path) = std::env::var("PATH") {
            vars.push(format!("PATH={path}"));
        }
        vars
    }

    /// Forks the interpreter child. In the child: default SIGPIPE
    /// disposition, pipes duped onto stdin/stdout, working directory set
    /// to the script's parent, then `execve` of either
    /// `<interpreter> <script_basename>` or `./<script_basename>`.
    /// In the parent both retained ends come back non-blocking.
    pub fn execute(&self) -> Result<CgiChild, CgiError> {
        if !self.script_path.is_file() {
            return Err(CgiError::ScriptNotFound(self.script_path.clone()));
        }
        if let Some(interp) = self.interpreter.as_deref() {
            if !interp.is_file() {
                return Err(CgiError::InterpreterNotFound(interp.to_path_buf()));
            }
        }

        let script_dir = self.script_path.parent().unwrap_or_else(|| Path::new("."));
        let basename = self
            .script_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        // argv/envp are assembled before fork so the child only dups,
        // chdirs and execs.
        let (exec_path, argv_owned) = match self.interpreter.as_deref() {
            Some(interp) => (
                path_cstr(interp),
                vec![path_cstr(interp), cstr(&basename)],
            ),
            None => {
                let rel = format!("./{basename}");
                (cstr(&rel), vec![cstr(&rel)])
            }
        };
        let env_owned: Vec<CString> = self
            .build_env()
            .into_iter()
            .filter_map(|v| CString::new(v).ok())
            .collect();
        let mut argv: Vec<*const libc::c_char> = argv_owned.iter().map(|s| s.as_ptr()).collect();
        argv.push(std::ptr::null());
        let mut envp: Vec<*const libc::c_char> = env_owned.iter().map(|s| s.as_ptr()).collect();
        envp.push(std::ptr::null());
        let dir_c = path_cstr(script_dir);

        let mut in_pipe = [0; 2];
        let mut out_pipe = [0; 2];
        unsafe {
            if libc::pipe(in_pipe.as_mut_ptr()) != 0 {
                return Err(CgiError::Pipe(io::Error::last_os_error()));
            }
            if libc::pipe(out_pipe.as_mut_ptr()) != 0 {
                let err = io::Error::last_os_error();
                libc::close(in_pipe[0]);
                libc::close(in_pipe[1]);
                return Err(CgiError::Pipe(err));
            }
        }

        let pid = unsafe { libc::fork() };
        if pid < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(in_pipe[0]);
                libc::close(in_pipe[1]);
                libc::close(out_pipe[0]);
                libc::close(out_pipe[1]);
            }
            return Err(CgiError::Fork(err));
        }

        if pid == 0 {
            // Child. The parent ignores SIGPIPE; scripts get the default.
            unsafe {
                libc::signal(libc::SIGPIPE, libc::SIG_DFL);
                libc::close(in_pipe[1]);
                libc::close(out_pipe[0]);
                libc::dup2(in_pipe[0], libc::STDIN_FILENO);
                libc::dup2(out_pipe[1], libc::STDOUT_FILENO);
                libc::close(in_pipe[0]);
                libc::close(out_pipe[1]);
                libc::chdir(dir_c.as_ptr());
                libc::execve(exec_path.as_ptr(), argv.as_ptr(), envp.as_ptr());
                libc::_exit(1);
            }
        }

        // Parent: drop the child-side ends, keep ours non-blocking.
        unsafe {
            libc::close(in_pipe[0]);
            libc::close(out_pipe[1]);
        }
        let stdin = Fd(in_pipe[1]);
        let stdout = Fd(out_pipe[0]);
        set_nonblocking(stdin.raw()).map_err(CgiError::Pipe)?;
        set_nonblocking(stdout.raw()).map_err(CgiError::Pipe)?;
        Ok(CgiChild { stdin, stdout, pid })
    }
}

/// Splits collected child stdout at the first `CRLF CRLF` (or `LF LF`)
/// and maps the CGI header block onto an HTTP response. `None` means the
/// output is not valid CGI.
pub fn parse_output(output: &[u8]) -> Option<Response> {
    let (header_len, sep_len) = match twoway::find_bytes(output, b"\r\n\r\n") {
        Some(i) => (i, 4),
        None => match twoway::find_bytes(output, b"\n\n") {
            Some(i) => (i, 2),
            None => return None,
        },
    };
    let head = String::from_utf8_lossy(&output[..header_len]);
    let body = &output[header_len + sep_len..];

    let mut resp = Response::new(StatusCode::Ok);
    let mut status_code: u16 = 200;
    let mut status_reason = "OK".to_string();
    let mut explicit_status = false;
    let mut has_content_type = false;

    for line in head.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim_start_matches([' ', '\t']);
        if name.eq_ignore_ascii_case("status") {
            let mut words = value.splitn(2, ' ');
            if let Some(Ok(code)) = words.next().map(str::parse::<u16>) {
                status_code = code;
                explicit_status = true;
            }
            status_reason = match words.next().map(str::trim) {
                Some(rest) if !rest.is_empty() => rest.to_string(),
                _ => "OK".to_string(),
            };
        } else if name.eq_ignore_ascii_case("location") {
            resp.set_header("Location", value);
            if !explicit_status {
                status_code = 302;
                status_reason = "Found".to_string();
            }
        } else {
            if name.eq_ignore_ascii_case("content-type") {
                has_content_type = true;
            }
            resp.set_header(name, value);
        }
    }
    if !has_content_type {
        resp.set_header("Content-Type", "text/html");
    }
    resp.set_status(status_code, &status_reason);
    resp.set_body(body.to_vec());
    Some(resp)
}

/// True when `path` names a script with the given extension, allowing
/// trailing path info (`/script.py/extra`) or a query string.
pub fn is_cgi_target(path: &str, extension: &str) -> bool {
    if extension.is_empty() {
        return false;
    }
    let Some(pos) = path.find(extension) else {
        return false;
    };
    let after = pos + extension.len();
    after == path.len() || path[after..].starts_with('/') || path[after..].starts_with('?')
}

/// Filesystem path of the script: the URL up to and including the
/// extension, rooted at the document root, canonicalized when possible.
pub fn script_path_for(url_path: &str, document_root: &Path, extension: &str) -> Option<PathBuf> {
    let pos = url_path.find(extension)?;
    let script_url = &url_path[..pos + extension.len()];
    let script_url = script_url.split('?').next().unwrap_or(script_url);
    let relative = document_root.join(script_url.trim_start_matches('/'));
    Some(fs::canonicalize(&relative).unwrap_or(relative))
}

/// URL remainder after the script's basename within the target.
fn extract_path_info(url_path: &str, script: &Path) -> String {
    let basename = match script.file_name() {
        Some(n) => format!("/{}", n.to_string_lossy()),
        None => return String::new(),
    };
    match url_path.find(&basename) {
        Some(pos) => url_path[pos + basename.len()..].to_string(),
        None => String::new(),
    }
}

fn cstr(s: &str) -> CString {
    CString::new(s).unwrap_or_default()
}

fn path_cstr(p: &Path) -> CString {
    CString::new(p.as_os_str().as_bytes()).unwrap_or_default()
}
