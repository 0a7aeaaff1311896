//! The launcher runtime and its process-level wiring.

mod jobs;
mod runtime;
mod signals;

pub use jobs::{HEALTH_JOB, IP_JOB};
pub use runtime::*;
pub use signals::*;
