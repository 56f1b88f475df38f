use std::sync::Arc;
use tracing::debug;

use super::dispatcher::{DispatchReport, StageDispatcher};
use super::executor::{ExecutionOutcome, StageExecutor};
use super::processor::StageProcessor;
use super::PipelineError;
use crate::config::PipelineConfig;
use crate::notify::{FanOutReport, MailTransport, Notifier, TemplateRenderer};
use crate::observability::PipelineMetrics;
use crate::queue::{QueueError, Task, TaskPolicy, TaskQueue, TaskSubmitter};
use crate::store::EntityStore;

/// External systems a pipeline is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn EntityStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub processor: Arc<dyn StageProcessor>,
    pub renderer: Arc<dyn TemplateRenderer>,
    pub transport: Arc<dyn MailTransport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskReport {
    Dispatch(DispatchReport),
    Execution(ExecutionOutcome),
    FanOut(FanOutReport),
    Delivered,
}

/// Routes each [`Task`] to its handler.
pub struct TaskRunner {
    submitter: TaskSubmitter,
    dispatcher: StageDispatcher,
    executor: StageExecutor,
    notifier: Notifier,
}

impl TaskRunner {
    pub fn new(
        collaborators: Collaborators,
        config: &PipelineConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self, QueueError> {
        let policy = TaskPolicy::from_config(&config.tasks)?;
        let submitter = TaskSubmitter::new(collaborators.queue, policy, metrics.clone());
        let dispatcher = StageDispatcher::new(collaborators.store.clone(), submitter.clone(), metrics.clone());
        let executor = StageExecutor::new(
            collaborators.store.clone(),
            collaborators.processor,
            dispatcher.clone(),
            metrics.clone(),
        );
        let notifier = Notifier::new(
            collaborators.store,
            submitter.clone(),
            collaborators.renderer,
            collaborators.transport,
            config.notifications.clone(),
            metrics,
        );
        Ok(Self {
            submitter,
            dispatcher,
            executor,
            notifier,
        })
    }

    /// Submitter sharing this runner's queue and policy, for callers that
    /// start work from outside a task.
    pub fn submitter(&self) -> &TaskSubmitter {
        &self.submitter
    }

    pub fn dispatcher(&self) -> &StageDispatcher {
        &self.dispatcher
    }

    pub fn executor(&self) -> &StageExecutor {
        &self.executor
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub async fn run(&self, task: &Task) -> Result<TaskReport, PipelineError> {
        debug!(task.name = task.name(), "running task");
        let report = match task {
            Task::DispatchStage {
                election_id,
                stage,
                redispatch,
            } => TaskReport::Dispatch(
                self.dispatcher
                    .dispatch(*election_id, *stage, *redispatch)
                    .await?,
            ),
            Task::ExecuteStage { poll_id, stage } => {
                TaskReport::Execution(self.executor.execute(*poll_id, *stage).await?)
            }
            Task::AddTrusteeFactors {
                poll_id,
                trustee_id,
                submission,
            } => TaskReport::Execution(
                self.executor
                    .add_trustee_factors(*poll_id, *trustee_id, submission)
                    .await?,
            ),
            Task::NotifyTrustees { election_id } => {
                TaskReport::FanOut(self.notifier.notify_trustees(*election_id).await?)
            }
            Task::TrusteeEmail { trustee_id } => {
                self.notifier.trustee_email(*trustee_id).await?;
                TaskReport::Delivered
            }
            Task::VotersEmail(request) => TaskReport::FanOut(self.notifier.voters_email(request).await?),
            Task::SingleVoterEmail(request) => {
                self.notifier.single_voter_email(request).await?;
                TaskReport::Delivered
            }
            Task::SendCastVoteEmail {
                poll_id,
                voter_id,
                signature,
            } => {
                self.notifier
                    .send_cast_vote_email(*poll_id, *voter_id, signature)
                    .await?;
                TaskReport::Delivered
            }
        };
        Ok(report)
    }
}
