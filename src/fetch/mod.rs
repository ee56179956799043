//! The fetch engine: pagination, retry, bounded scheduling, and the
//! orchestration that ties them together across partitions.

pub mod orchestrator;
pub mod paginator;
pub mod queue;
pub mod retry;
pub mod status;

pub use orchestrator::{
    Orchestrator, OrchestratorConfig, SearchObserver, SearchOutcome, SearchRequest,
};
pub use queue::{FetchTask, QueueProgress, QueueSummary, RequestQueue, TaskOutcome};
pub use status::{PartitionState, PartitionStatus, StatusBoard};
