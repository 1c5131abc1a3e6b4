//! Socket-facing side of the server: the listener, the event loop that
//! multiplexes every connection, and the control channel that stops it.

pub mod control;
pub mod listener;
pub mod reactor;

pub use control::ControlHandle;
pub use listener::Listener;
pub use reactor::Reactor;
