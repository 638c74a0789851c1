pub mod event;
pub mod poller;

pub use event::Event;
pub use poller::Poller;
