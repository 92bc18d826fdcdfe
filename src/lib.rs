//! perfscope core library: profiles one process with `perf` and turns the
//! report into hotspot statistics and folded flame-graph stacks.

mod artifacts;
mod cmd;
mod config;
mod error;
mod flame;
mod parser;
mod process;
mod profiler;
mod request;
mod runtime;
mod sampler;
mod stats;

pub use artifacts::*;
pub use cmd::*;
pub use config::*;
pub use error::*;
pub use flame::*;
pub use parser::*;
pub use process::*;
pub use profiler::*;
pub use request::*;
pub use runtime::*;
pub use sampler::*;
pub use stats::*;
