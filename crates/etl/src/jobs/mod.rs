mod queue;
mod tracker;

pub use queue::{ExtractionQueue, TriggerError, TriggerOutcome};
pub use tracker::ExtractionJobs;
