//! The event loop: owns every descriptor, drives `poll(2)` with a one
//! second tick, and walks each connection through parse, dispatch, CGI
//! exchange and response draining without ever blocking.

use std::collections::{HashMap, HashSet};
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::application::handler::{cgi, error_page};
use crate::application::server::dispatch::{self, Dispatch};
use crate::config::Config;
use crate::core::event::{Event, Poller};
use crate::core::net::socket::{accept_nonblocking, create_listening_socket};
use crate::core::net::{CgiSession, Connection, Fd};
use crate::http::serializer::serialize_response;
use crate::http::{Response, StatusCode};

pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);
pub const CGI_TIMEOUT: Duration = Duration::from_secs(30);
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);
const POLL_TIMEOUT_MS: i32 = 1000;
const READ_CHUNK: usize = 8192;

struct Listener {
    fd: Fd,
    port: u16,
    server_idx: usize,
}

/// What to do after servicing readiness on a CGI pipe; computed under the
/// session borrow, applied after it ends.
enum CgiStep {
    Nothing,
    StdinDrained,
    Finish(bool),
    /// The pipe has no owning session anymore; drop it from the poll set.
    Orphaned,
}

enum RequestState {
    Incomplete,
    ProtocolError(usize, u16),
    TooLarge(usize),
    Ready(usize),
}

pub struct ServerManager {
    config: Config,
    poller: Poller,
    listeners: Vec<Listener>,
    conns: HashMap<RawFd, Connection>,
    /// CGI pipe descriptor to owning client descriptor.
    pipe_owner: HashMap<RawFd, RawFd>,
}

impl ServerManager {
    /// Binds every configured listen address (one socket per address,
    /// shared by the virtual hosts on it) and registers the listeners.
    pub fn new(config: Config) -> io::Result<Self> {
        let mut poller = Poller::new();
        let mut listeners = Vec::new();
        let mut bound = HashSet::new();
        for (idx, server) in config.servers.iter().enumerate() {
            for &addr in &server.listen {
                if !bound.insert(addr) {
                    continue;
                }
                let fd = create_listening_socket(addr)?;
                poller.register_read(fd.raw());
                info!("[{}:{}] started", server.primary_name(), addr.port());
                listeners.push(Listener { fd, port: addr.port(), server_idx: idx });
            }
        }
        Ok(Self {
            config,
            poller,
            listeners,
            conns: HashMap::new(),
            pipe_owner: HashMap::new(),
        })
    }

    pub fn server_count(&self) -> usize {
        self.config.servers.len()
    }

    /// Runs until `running` is cleared. One `poll` per cycle; a timeout
    /// sweep every five seconds; listeners first, then clients and CGI
    /// pipes. Descriptors closed mid-cycle are remembered so later
    /// snapshot events for them are skipped.
    pub fn run(&mut self, running: &AtomicBool) -> io::Result<()> {
        let mut last_sweep = Instant::now();
        while running.load(Ordering::Relaxed) {
            let events = self.poller.wait(POLL_TIMEOUT_MS)?;
            let mut dead: HashSet<RawFd> = HashSet::new();

            if last_sweep.elapsed() >= SWEEP_INTERVAL {
                self.sweep_timeouts(&mut dead);
                last_sweep = Instant::now();
            }

            for ev in &events {
                if ev.readable {
                    if let Some((port, server_idx, lfd)) = self.listener_at(ev.fd) {
                        self.accept_all(lfd, port, server_idx);
                    }
                }
            }

            for ev in &events {
                if dead.contains(&ev.fd) || self.listener_at(ev.fd).is_some() {
                    continue;
                }
                if let Some(&client) = self.pipe_owner.get(&ev.fd) {
                    self.handle_cgi_event(*ev, client, &mut dead);
                } else if self.conns.contains_key(&ev.fd) {
                    self.handle_client_event(*ev, &mut dead);
                }
            }
        }
        self.shutdown();
        Ok(())
    }

    fn listener_at(&self, fd: RawFd) -> Option<(u16, usize, RawFd)> {
        self.listeners
            .iter()
            .find(|l| l.fd.raw() == fd)
            .map(|l| (l.port, l.server_idx, l.fd.raw()))
    }

    /// Drains the accept queue; each accepted socket becomes non-blocking
    /// and is registered for `POLLIN` only.
    fn accept_all(&mut self, listen_fd: RawFd, port: u16, server_idx: usize) {
        loop {
            match accept_nonblocking(listen_fd) {
                Ok(Some(fd)) => {
                    let raw = fd.raw();
                    self.poller.register_read(raw);
                    self.conns.insert(raw, Connection::new(fd, port, server_idx));
                    debug!("accepted fd {raw} on port {port}");
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("accept failed on port {port}: {e}");
                    break;
                }
            }
        }
    }

    fn handle_client_event(&mut self, ev: Event, dead: &mut HashSet<RawFd>) {
        if ev.error || ev.hangup {
            self.close_client(ev.fd, dead);
            return;
        }
        if ev.readable {
            self.client_read(ev.fd, dead);
        }
        if dead.contains(&ev.fd) {
            return;
        }
        if ev.writable {
            self.client_write(ev.fd, dead);
        }
    }

    /// Exactly one `read` per readiness event. A non-positive return
    /// collapses the connection; errno is never consulted.
    fn client_read(&mut self, fd: RawFd, dead: &mut HashSet<RawFd>) {
        let alive = {
            let Some(conn) = self.conns.get_mut(&fd) else {
                return;
            };
            let mut buf = [0u8; READ_CHUNK];
            let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut _, buf.len()) };
            if n > 0 {
                conn.touch();
                conn.request.append(&buf[..n as usize]);
                true
            } else {
                false
            }
        };
        if !alive {
            self.close_client(fd, dead);
            return;
        }
        self.advance_request(fd, dead);
    }

    /// Parses as far as the buffered bytes allow and reacts: protocol
    /// errors and early oversize declarations answer immediately, a
    /// complete request goes to dispatch.
    fn advance_request(&mut self, fd: RawFd, dead: &mut HashSet<RawFd>) {
        let state = {
            let Some(conn) = self.conns.get_mut(&fd) else {
                return;
            };
            if conn.response_ready || conn.cgi.is_some() {
                return;
            }
            if !conn.request.headers_complete && !conn.request.parse_headers() {
                return;
            }
            let idx = Self::vhost_for(&self.config, conn);
            let req = &conn.request;
            if req.parse_error {
                RequestState::ProtocolError(idx, req.error_code)
            } else {
                let server = &self.config.servers[idx];
                let limit = server.body_limit(server.find_location(req.path()));
                let oversize = req.method == "POST"
                    && (req.content_length as u64 > limit || req.body_len_so_far() as u64 > limit);
                if oversize {
                    // Declared or accumulated size over the cap: refuse
                    // without waiting for (or reading) the rest.
                    RequestState::TooLarge(idx)
                } else if !req.body_complete {
                    RequestState::Incomplete
                } else {
                    RequestState::Ready(idx)
                }
            }
        };

        match state {
            RequestState::Incomplete => {}
            RequestState::ProtocolError(idx, code) => {
                let status = match code {
                    505 => StatusCode::HttpVersionNotSupported,
                    _ => StatusCode::BadRequest,
                };
                let resp = error_page::error_response(status, &self.config.servers[idx]);
                self.queue_response(fd, resp, false);
            }
            RequestState::TooLarge(idx) => {
                let mut resp =
                    error_page::error_response(StatusCode::PayloadTooLarge, &self.config.servers[idx]);
                resp.set_header("Connection", "close");
                self.queue_response(fd, resp, false);
            }
            RequestState::Ready(idx) => self.dispatch_request(fd, idx, dead),
        }
    }

    fn dispatch_request(&mut self, fd: RawFd, server_idx: usize, dead: &mut HashSet<RawFd>) {
        let outcome = {
            let Some(conn) = self.conns.get_mut(&fd) else {
                return;
            };
            let server = &self.config.servers[server_idx];
            info!(
                "[{}:{}] {} {}",
                server.primary_name(),
                conn.port,
                conn.request.method,
                conn.request.path()
            );
            conn.keep_alive = conn.request.wants_keep_alive();
            dispatch::handle(server, conn.port, &mut conn.request)
        };
        match outcome {
            Dispatch::Respond(resp) => {
                let keep = self.conns.get(&fd).map(|c| c.keep_alive).unwrap_or(false)
                    && resp.status != 413;
                self.queue_response(fd, resp, keep);
            }
            Dispatch::Cgi(coordinator) => self.start_cgi(fd, *coordinator, dead),
        }
    }

    /// Serializes and stages the response; `POLLOUT` interest is added
    /// here and removed once the buffer drains.
    fn queue_response(&mut self, fd: RawFd, resp: Response, keep_alive: bool) {
        let Some(conn) = self.conns.get_mut(&fd) else {
            return;
        };
        conn.keep_alive = keep_alive;
        let wire = serialize_response(&resp, keep_alive);
        conn.queue(wire);
        self.poller.set_writable(fd, true);
    }

    /// Exactly one `write` per readiness event. After the final byte the
    /// connection either resets for the next pipelined request or closes.
    fn client_write(&mut self, fd: RawFd, dead: &mut HashSet<RawFd>) {
        enum WriteStep {
            Collapsed,
            Partial,
            Finished(bool),
        }
        let step = {
            let Some(conn) = self.conns.get_mut(&fd) else {
                return;
            };
            if !conn.response_ready || conn.write_done() {
                return;
            }
            let remaining = conn.out_buf.len() - conn.bytes_sent;
            let start = unsafe { conn.out_buf.as_ptr().add(conn.bytes_sent) };
            let n = unsafe { libc::write(fd, start as *const _, remaining) };
            if n <= 0 {
                WriteStep::Collapsed
            } else {
                conn.bytes_sent += n as usize;
                if conn.write_done() {
                    WriteStep::Finished(conn.keep_alive)
                } else {
                    WriteStep::Partial
                }
            }
        };
        match step {
            WriteStep::Collapsed => self.close_client(fd, dead),
            WriteStep::Partial => {}
            WriteStep::Finished(false) => self.close_client(fd, dead),
            WriteStep::Finished(true) => {
                if let Some(conn) = self.conns.get_mut(&fd) {
                    conn.begin_next_request();
                }
                self.poller.set_writable(fd, false);
                // A pipelined request may already be buffered in full.
                self.advance_request(fd, dead);
            }
        }
    }

    /// Launches the CGI child and registers its pipes in the poll set.
    /// Launch failures answer 500 directly.
    fn start_cgi(&mut self, fd: RawFd, coordinator: cgi::CgiCoordinator, dead: &mut HashSet<RawFd>) {
        let child = match coordinator.execute() {
            Ok(child) => child,
            Err(e) => {
                warn!("cgi launch failed: {e}");
                self.respond_cgi_failure(fd);
                return;
            }
        };
        let Some(conn) = self.conns.get_mut(&fd) else {
            // Owner vanished between dispatch and launch; reap at once.
            unsafe {
                libc::kill(child.pid, libc::SIGKILL);
                let mut status = 0;
                libc::waitpid(child.pid, &mut status, 0);
            }
            dead.insert(fd);
            return;
        };
        let input = if conn.request.method == "POST" {
            conn.request.body.clone()
        } else {
            Vec::new()
        };
        let stdout_raw = child.stdout.raw();
        let stdin_raw = child.stdin.raw();
        let mut session = CgiSession {
            stdin: Some(child.stdin),
            stdout: Some(child.stdout),
            pid: child.pid,
            input,
            input_sent: 0,
            output: Vec::new(),
            started: Instant::now(),
        };
        self.poller.register_read(stdout_raw);
        self.pipe_owner.insert(stdout_raw, fd);
        if session.input.is_empty() {
            session.stdin = None;
        } else {
            self.poller.register_write(stdin_raw);
            self.pipe_owner.insert(stdin_raw, fd);
        }
        debug!("cgi started: pid {} for fd {fd}", session.pid);
        conn.cgi = Some(session);
    }

    fn handle_cgi_event(&mut self, ev: Event, client: RawFd, dead: &mut HashSet<RawFd>) {
        let mut step = CgiStep::Orphaned;
        if let Some(conn) = self.conns.get_mut(&client) {
            if let Some(session) = conn.cgi.as_mut() {
                let is_stdin = session.stdin.as_ref().is_some_and(|f| f.raw() == ev.fd);
                step = if is_stdin {
                    Self::service_cgi_stdin(session, ev)
                } else {
                    Self::service_cgi_stdout(session, ev)
                };
            }
        }
        match step {
            CgiStep::Nothing => {}
            CgiStep::Orphaned => {
                self.poller.deregister(ev.fd);
                self.pipe_owner.remove(&ev.fd);
            }
            CgiStep::StdinDrained => {
                if let Some(session) = self.conns.get_mut(&client).and_then(|c| c.cgi.as_mut()) {
                    session.stdin = None;
                }
                self.poller.deregister(ev.fd);
                self.pipe_owner.remove(&ev.fd);
                dead.insert(ev.fd);
            }
            CgiStep::Finish(success) => self.finish_cgi(client, success, dead),
        }
    }

    /// One write of pending request-body bytes toward the child.
    fn service_cgi_stdin(session: &mut CgiSession, ev: Event) -> CgiStep {
        if ev.error || ev.hangup {
            return CgiStep::Finish(false);
        }
        if !ev.writable {
            return CgiStep::Nothing;
        }
        let remaining = &session.input[session.input_sent..];
        let n = unsafe { libc::write(ev.fd, remaining.as_ptr() as *const _, remaining.len()) };
        if n <= 0 {
            return CgiStep::Finish(false);
        }
        session.input_sent += n as usize;
        if session.input_sent >= session.input.len() {
            CgiStep::StdinDrained
        } else {
            CgiStep::Nothing
        }
    }

    /// One read of child output; on hangup the remainder is drained
    /// before finishing.
    fn service_cgi_stdout(session: &mut CgiSession, ev: Event) -> CgiStep {
        if ev.hangup {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                let n = unsafe { libc::read(ev.fd, buf.as_mut_ptr() as *mut _, buf.len()) };
                if n <= 0 {
                    break;
                }
                session.output.extend_from_slice(&buf[..n as usize]);
            }
            return CgiStep::Finish(true);
        }
        if ev.error {
            return CgiStep::Finish(false);
        }
        if !ev.readable {
            return CgiStep::Nothing;
        }
        let mut buf = [0u8; READ_CHUNK];
        let n = unsafe { libc::read(ev.fd, buf.as_mut_ptr() as *mut _, buf.len()) };
        match n {
            n if n > 0 => {
                session.output.extend_from_slice(&buf[..n as usize]);
                CgiStep::Nothing
            }
            0 => CgiStep::Finish(true),
            _ => CgiStep::Finish(false),
        }
    }

    /// Tears the CGI exchange down: pipes leave the poll set, the child
    /// is reaped (SIGKILL first on failure), and the client gets either
    /// the parsed script response or a 500.
    fn finish_cgi(&mut self, client: RawFd, success: bool, dead: &mut HashSet<RawFd>) {
        let (session, keep) = {
            let Some(conn) = self.conns.get_mut(&client) else {
                return;
            };
            let Some(session) = conn.cgi.take() else {
                return;
            };
            (session, conn.keep_alive)
        };
        let mut session = session;
        let mut ok = success;

        if session.pid > 0 {
            if !ok {
                unsafe { libc::kill(session.pid, libc::SIGKILL) };
            }
            let mut status: libc::c_int = 0;
            let reaped = unsafe { libc::waitpid(session.pid, &mut status, 0) };
            if reaped != session.pid
                || libc::WIFSIGNALED(status)
                || !libc::WIFEXITED(status)
                || libc::WEXITSTATUS(status) != 0
            {
                ok = false;
            }
        } else {
            ok = false;
        }

        for fd in [session.stdin.take(), session.stdout.take()].into_iter().flatten() {
            let raw = fd.raw();
            self.poller.deregister(raw);
            self.pipe_owner.remove(&raw);
            dead.insert(raw);
        }
        debug!("cgi finished: pid {} ok={ok}", session.pid);

        let response = if ok { cgi::parse_output(&session.output) } else { None };
        match response {
            Some(resp) => self.queue_response(client, resp, keep),
            None => self.respond_cgi_failure(client),
        }
    }

    /// 500 toward the client, honoring its keep-alive preference.
    fn respond_cgi_failure(&mut self, fd: RawFd) {
        let Some(conn) = self.conns.get(&fd) else {
            return;
        };
        let keep = conn.keep_alive;
        let idx = Self::vhost_for(&self.config, conn);
        let resp = error_page::error_response(StatusCode::InternalServerError, &self.config.servers[idx]);
        self.queue_response(fd, resp, keep);
    }

    /// Virtual host for a connection: Host-header match on the accepting
    /// port, else the default server bound at accept time.
    fn vhost_for(config: &Config, conn: &Connection) -> usize {
        match conn.request.header("Host") {
            Some(host) => config.find_server(conn.port, Some(host)),
            None => conn.server_idx,
        }
    }

    /// Every five seconds: idle connections past 60 s close; CGI children
    /// past 30 s are killed and answered with 500.
    fn sweep_timeouts(&mut self, dead: &mut HashSet<RawFd>) {
        let mut expired_cgi = Vec::new();
        let mut idle = Vec::new();
        for (&fd, conn) in &self.conns {
            match conn.cgi.as_ref() {
                Some(session) if session.started.elapsed() >= CGI_TIMEOUT => expired_cgi.push(fd),
                Some(_) => {}
                None if conn.idle_for() >= CONNECTION_TIMEOUT => idle.push(fd),
                None => {}
            }
        }
        for fd in expired_cgi {
            warn!("cgi timeout on fd {fd}");
            self.finish_cgi(fd, false, dead);
        }
        for fd in idle {
            debug!("idle timeout on fd {fd}");
            self.close_client(fd, dead);
        }
    }

    /// Destroys a connection. A live CGI child is signalled and reaped
    /// before its descriptors are released.
    fn close_client(&mut self, fd: RawFd, dead: &mut HashSet<RawFd>) {
        if let Some(mut conn) = self.conns.remove(&fd) {
            if let Some(session) = conn.cgi.take() {
                if session.pid > 0 {
                    unsafe {
                        libc::kill(session.pid, libc::SIGKILL);
                        let mut status = 0;
                        libc::waitpid(session.pid, &mut status, 0);
                    }
                }
                for pipe in [session.stdin, session.stdout].into_iter().flatten() {
                    let raw = pipe.raw();
                    self.poller.deregister(raw);
                    self.pipe_owner.remove(&raw);
                    dead.insert(raw);
                }
            }
        }
        self.poller.deregister(fd);
        dead.insert(fd);
    }

    fn shutdown(&mut self) {
        let fds: Vec<RawFd> = self.conns.keys().copied().collect();
        let mut dead = HashSet::new();
        for fd in fds {
            self.close_client(fd, &mut dead);
        }
        for listener in self.listeners.drain(..) {
            self.poller.deregister(listener.fd.raw());
        }
        info!("shut down");
    }
}
