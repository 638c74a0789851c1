use std::os::fd::RawFd;

use libc::close;

/// Owned descriptor, closed on drop. The event loop holds exactly one of
/// these per registered descriptor; nothing else may close it.
#[derive(Debug)]
pub struct Fd(pub RawFd);

impl Fd {
    pub fn raw(&self) -> RawFd {
        self.0
    }
}

impl Drop for Fd {
    fn drop(&mut self) {
        if self.0 >= 0 {
            unsafe { close(self.0) };
        }
    }
}
