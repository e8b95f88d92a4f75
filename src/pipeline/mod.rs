pub mod events;
pub mod orchestrator;
pub mod report;

#[cfg(test)]
mod tests;

pub use events::{ProgressEvent, ProgressSink};
pub use orchestrator::{
    ensure_session, AutoConfirm, CollectionSelector, MoveConfirmation, MovePlan, Orchestrator,
    PlannedMove, RunRequest,
};
pub use report::{MoveOutcome, MoveStatus, RunReport, RunSummary};
