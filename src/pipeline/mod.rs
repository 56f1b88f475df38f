//! Stage advancement
//!
//! An election advances one stage at a time. The dispatcher fans a stage
//! out as one `execute_stage` task per eligible poll; each executor moves
//! its poll forward under the poll's row lock and then checks the
//! completion gate. The executor that observes every poll at the stage
//! triggers the next dispatch, or stamps the election complete after the
//! last stage.

pub mod dispatcher;
pub mod executor;
pub mod gate;
pub mod processor;
pub mod runner;

use thiserror::Error;

use crate::model::{PollId, Stage, TransitionError, TrusteeId};
use crate::notify::NotifyError;
use crate::queue::QueueError;
use crate::store::StoreError;

pub use dispatcher::{Advance, DispatchReport, StageDispatcher};
pub use executor::{ExecutionOutcome, GateOutcome, StageExecutor};
pub use gate::CompletionGate;
pub use processor::{PartialDecryption, ProcessingError, SimulatedProcessor, StageProcessor};
pub use runner::{Collaborators, TaskReport, TaskRunner};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to enqueue follow-up work: {0}")]
    Queue(#[from] QueueError),
    #[error("{} failed for poll {poll_id}: {source}", .stage.step_name())]
    Processing {
        poll_id: PollId,
        stage: Stage,
        #[source]
        source: ProcessingError,
    },
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
    #[error("trustee {trustee_id} does not belong to the election of poll {poll_id}")]
    ForeignTrustee { trustee_id: TrusteeId, poll_id: PollId },
}

impl PipelineError {
    /// Whether resubmitting the same task could succeed without any
    /// operator action.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Store(e) => e.is_transient(),
            PipelineError::Queue(e) => e.is_transient(),
            PipelineError::Processing { source, .. } => source.is_transient(),
            PipelineError::Notify(e) => e.is_transient(),
            PipelineError::Transition(_) | PipelineError::ForeignTrustee { .. } => false,
        }
    }
}
