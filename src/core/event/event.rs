/// Readiness report for one descriptor, decoded from `poll(2)` revents.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub fd: i32,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub hangup: bool,
}
