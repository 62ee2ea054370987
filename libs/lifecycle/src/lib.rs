//! Signal-driven process lifecycle shared by the publisher and subscriber.
//!
//! `Running → ShuttingDown → Stopped`: a background task runs until an OS
//! signal arrives, then a shared [`CancellationToken`](tokio_util::sync::CancellationToken)
//! is cancelled and the task gets a bounded window to finish.

mod error;
mod signal;
mod supervisor;

pub use error::LifecycleError;
pub use signal::{Signal, shutdown_signal};
pub use supervisor::{Phase, Supervisor};
