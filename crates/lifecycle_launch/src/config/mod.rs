//! Launch file configuration, arguments, parameters and substitution

mod arguments;
mod launch_file;
mod parameters;
mod substitution;

pub use arguments::*;
pub use launch_file::*;
pub use parameters::*;
pub use substitution::*;
