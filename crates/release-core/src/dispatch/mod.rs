//! Dispatch coordination: leases, re-evaluation queue, executor seam and
//! the engine that drives evaluations.

pub mod coordinator;
pub mod executor;
pub mod lease;
pub mod queue;

pub use coordinator::{EvaluationOutcome, ReleaseEngine};
pub use executor::{JobExecutor, RecordingExecutor};
pub use lease::{Lease, LeaseTable};
pub use queue::{EvaluationQueue, EvaluationReceiver};
