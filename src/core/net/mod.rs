pub mod connection;
pub mod fd;
pub mod socket;

pub use connection::{CgiSession, Connection};
pub use fd::Fd;
