//! webserv — a configurable HTTP/1.1 origin server.
//!
//! One thread, one `poll(2)` set: listeners, client sockets and CGI
//! pipes all share the same readiness loop. Requests are parsed
//! incrementally, dispatched to static-file handling or an out-of-process
//! CGI/1.1 interpreter, and answered with `Content-Length`-framed
//! responses under keep-alive.

pub mod application;
pub mod config;
pub mod core;
pub mod http;
pub mod logger;
