//! Runtime components for process management

pub mod process;
pub mod scripted;
pub mod signal;

pub use process::*;
pub use scripted::*;
pub use signal::*;
