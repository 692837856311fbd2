//! Lifecycle state machine for managed processes

mod controller;
mod state;

pub use controller::*;
pub use state::*;
