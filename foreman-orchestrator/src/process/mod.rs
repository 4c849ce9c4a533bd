//! OS process control
//!
//! Everything that touches pids lives here: the liveness oracle, spawning
//! with log redirection, the worker-local child table and termination.

pub mod liveness;
pub mod registry;
pub mod spawn;
pub mod terminate;

pub use liveness::is_alive;
pub use registry::ProcessRegistry;
pub use terminate::{TerminateError, terminate};
