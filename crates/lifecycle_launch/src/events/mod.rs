//! Event model: bus events, handler rules and the synchronous bus

mod bus;
mod event;
mod handler;

pub use bus::*;
pub use event::*;
pub use handler::*;
