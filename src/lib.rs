// Ballot Pipeline Library - stage advancement for elections and their polls
// This exposes the core components for testing and integration

pub mod cli;
pub mod config;
pub mod local;
pub mod model;
pub mod notify;
pub mod observability;
pub mod pipeline;
pub mod queue;
pub mod shutdown;
pub mod store;
pub mod telemetry;

// Re-export key types for easy access
pub use config::PipelineConfig;
pub use local::LocalPipeline;
pub use model::{Election, ElectionId, Poll, PollId, Stage, Trustee, TrusteeId, Voter, VoterId};
pub use notify::{Notifier, NotifyError, VoterFilter, VoterPredicate};
pub use observability::{OperationTimer, PipelineMetrics, PipelineStats};
pub use pipeline::{
    CompletionGate, ExecutionOutcome, PipelineError, StageDispatcher, StageExecutor,
    StageProcessor, TaskRunner,
};
pub use queue::{MemoryQueue, RunSummary, SubmitOptions, Task, TaskQueue, WorkerPool};
pub use shutdown::ShutdownCoordinator;
pub use store::{EntityStore, MemoryStore, StoreError};
pub use telemetry::{create_task_span, generate_correlation_id, init_telemetry};
