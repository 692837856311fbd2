//! Launch descriptions, their resolution into plans, and plan execution

mod composition;
mod entity;
mod orchestrator;
mod plan;

pub use composition::*;
pub use entity::*;
pub use orchestrator::*;
pub use plan::*;
