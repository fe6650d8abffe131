#![forbid(unsafe_code)]

mod queue;
mod tasks;

pub use queue::*;
pub use tasks::*;
