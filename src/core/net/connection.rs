use std::time::{Duration, Instant};

use crate::http::Request;

use super::fd::Fd;

/// Per-client state, created on accept and destroyed on disconnect, idle
/// timeout, or after the final write of a `Connection: close` response.
pub struct Connection {
    pub fd: Fd,
    /// Port of the accepting listener; drives virtual-host selection.
    pub port: u16,
    /// Index of the default server for that port.
    pub server_idx: usize,
    pub request: Request,
    pub out_buf: Vec<u8>,
    pub bytes_sent: usize,
    pub response_ready: bool,
    pub keep_alive: bool,
    pub last_activity: Instant,
    pub cgi: Option<CgiSession>,
}

/// Live CGI exchange owned by one connection. Both pipe ends are in the
/// event loop's poll set while present here; tearing the session down
/// must deregister them first and always reaps the child.
pub struct CgiSession {
    pub stdin: Option<Fd>,
    pub stdout: Option<Fd>,
    pub pid: libc::pid_t,
    pub input: Vec<u8>,
    pub input_sent: usize,
    pub output: Vec<u8>,
    pub started: Instant,
}

impl Connection {
    pub fn new(fd: Fd, port: u16, server_idx: usize) -> Self {
        Self {
            fd,
            port,
            server_idx,
            request: Request::new(),
            out_buf: Vec::new(),
            bytes_sent: 0,
            response_ready: false,
            keep_alive: true,
            last_activity: Instant::now(),
            cgi: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Stages serialized response bytes for draining under `POLLOUT`.
    pub fn queue(&mut self, bytes: Vec<u8>) {
        self.out_buf = bytes;
        self.bytes_sent = 0;
        self.response_ready = true;
    }

    pub fn write_done(&self) -> bool {
        self.bytes_sent >= self.out_buf.len()
    }

    /// Returns to the reading state after a fully-written response,
    /// carrying over any pipelined bytes.
    pub fn begin_next_request(&mut self) {
        self.request.reset_for_next();
        self.out_buf.clear();
        self.bytes_sent = 0;
        self.response_ready = false;
        self.keep_alive = true;
        self.touch();
    }
}
