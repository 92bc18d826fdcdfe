//! Subprocess execution and the record concurrency gate.

mod gate;
mod runner;

pub use gate::*;
pub use runner::*;
