use std::io;
use std::os::fd::RawFd;

use libc::{nfds_t, pollfd, POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT};

use super::event::Event;

/// Interest registry over `poll(2)`. Owned by the event loop; everything
/// it watches (listeners, client sockets, CGI pipes) lives in one set so
/// a single wait call drives the whole server.
pub struct Poller {
    fds: Vec<pollfd>,
}

impl Poller {
    pub fn new() -> Self {
        Self { fds: Vec::new() }
    }

    pub fn register_read(&mut self, fd: RawFd) {
        self.register(fd, POLLIN);
    }

    pub fn register_write(&mut self, fd: RawFd) {
        self.register(fd, POLLOUT);
    }

    fn register(&mut self, fd: RawFd, events: i16) {
        if let Some(entry) = self.fds.iter_mut().find(|p| p.fd == fd) {
            entry.events |= events;
        } else {
            self.fds.push(pollfd { fd, events, revents: 0 });
        }
    }

    /// Toggles write interest; read interest is left untouched.
    pub fn set_writable(&mut self, fd: RawFd, writable: bool) {
        if let Some(entry) = self.fds.iter_mut().find(|p| p.fd == fd) {
            if writable {
                entry.events |= POLLOUT;
            } else {
                entry.events &= !POLLOUT;
            }
        }
    }

    pub fn deregister(&mut self, fd: RawFd) {
        self.fds.retain(|p| p.fd != fd);
    }

    /// One bounded wait. Returns the ready set as an owned snapshot so
    /// handlers may freely register and deregister descriptors while the
    /// caller walks it. An interrupted wait reports no events.
    pub fn wait(&mut self, timeout_ms: i32) -> io::Result<Vec<Event>> {
        let n = unsafe { libc::poll(self.fds.as_mut_ptr(), self.fds.len() as nfds_t, timeout_ms) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(err);
        }
        let mut out = Vec::with_capacity(n as usize);
        for p in &self.fds {
            if p.revents == 0 {
                continue;
            }
            out.push(Event {
                fd: p.fd,
                readable: p.revents & POLLIN != 0,
                writable: p.revents & POLLOUT != 0,
                error: p.revents & (POLLERR | POLLNVAL) != 0,
                hangup: p.revents & POLLHUP != 0,
            });
        }
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.fds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }
}
