//! Task queue abstraction
//!
//! Tasks are fire-and-forget: a submitter never waits for a task's result,
//! and any task may be delivered more than once. Handlers make that safe by
//! re-checking persisted state under a row lock before doing anything.

pub mod memory;
pub mod rate_limit;
pub mod worker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::config::TaskConfig;
use crate::model::{ElectionId, PollId, Stage, TrusteeId, VoterId};
use crate::notify::{SingleVoterEmail, VotersEmail};
use crate::observability::PipelineMetrics;
use crate::pipeline::PartialDecryption;

pub use memory::{Envelope, MemoryQueue};
pub use rate_limit::{InvalidRateLimit, RateLimit, RateLimiters};
pub use worker::{RunSummary, TaskFailure, TaskTally, WorkerPool};

/// Units of work understood by the task runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Task {
    /// Fan a stage out to every eligible poll of an election.
    DispatchStage {
        election_id: ElectionId,
        stage: Stage,
        /// Re-run even if this stage was already dispatched.
        #[serde(default)]
        redispatch: bool,
    },
    /// Move one poll into `stage`.
    ExecuteStage { poll_id: PollId, stage: Stage },
    /// Record one external trustee's partial decryption for a poll.
    AddTrusteeFactors {
        poll_id: PollId,
        trustee_id: TrusteeId,
        submission: PartialDecryption,
    },
    /// Ask every non-local trustee for their partial decryptions.
    NotifyTrustees { election_id: ElectionId },
    TrusteeEmail { trustee_id: TrusteeId },
    VotersEmail(VotersEmail),
    SingleVoterEmail(SingleVoterEmail),
    SendCastVoteEmail {
        poll_id: PollId,
        voter_id: VoterId,
        signature: String,
    },
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::DispatchStage { .. } => "dispatch_stage",
            Task::ExecuteStage { .. } => "execute_stage",
            Task::AddTrusteeFactors { .. } => "add_trustee_factors",
            Task::NotifyTrustees { .. } => "notify_trustees",
            Task::TrusteeEmail { .. } => "trustee_email",
            Task::VotersEmail(_) => "voters_email",
            Task::SingleVoterEmail(_) => "single_voter_email",
            Task::SendCastVoteEmail { .. } => "send_cast_vote_email",
        }
    }
}

/// Options attached to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubmitOptions {
    pub rate_limit: Option<RateLimit>,
    /// Always false for pipeline tasks; queues may refuse result tracking.
    pub result_expected: bool,
}

impl SubmitOptions {
    pub fn rate_limited(limit: RateLimit) -> Self {
        Self {
            rate_limit: Some(limit),
            result_expected: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("task queue is closed")]
    Closed,
    #[error("task queue does not track results")]
    ResultsUnsupported,
    #[error(transparent)]
    InvalidRateLimit(#[from] InvalidRateLimit),
}

impl QueueError {
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Closed)
    }
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn submit(&self, task: Task, options: SubmitOptions) -> Result<(), QueueError>;
}

/// Submission options for each task family, derived from configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPolicy {
    pub poll_tasks: SubmitOptions,
    pub voter_emails: SubmitOptions,
    pub trustee_emails: SubmitOptions,
}

impl TaskPolicy {
    pub fn from_config(config: &TaskConfig) -> Result<Self, QueueError> {
        let parse = |raw: Option<&str>| -> Result<SubmitOptions, QueueError> {
            Ok(match raw {
                Some(raw) => SubmitOptions::rate_limited(raw.parse()?),
                None => SubmitOptions::default(),
            })
        };
        Ok(Self {
            poll_tasks: parse(config.poll_task_rate.as_deref())?,
            voter_emails: parse(Some(config.voter_email_rate.as_str()))?,
            trustee_emails: parse(config.trustee_email_rate.as_deref())?,
        })
    }

    pub fn options_for(&self, task: &Task) -> SubmitOptions {
        match task {
            Task::ExecuteStage { .. } | Task::AddTrusteeFactors { .. } => self.poll_tasks,
            Task::SingleVoterEmail(_) | Task::SendCastVoteEmail { .. } => self.voter_emails,
            Task::TrusteeEmail { .. } => self.trustee_emails,
            Task::DispatchStage { .. } | Task::NotifyTrustees { .. } | Task::VotersEmail(_) => {
                SubmitOptions::default()
            }
        }
    }
}

/// Queue handle that applies the task policy and counts submissions.
#[derive(Clone)]
pub struct TaskSubmitter {
    queue: Arc<dyn TaskQueue>,
    policy: Arc<TaskPolicy>,
    metrics: Arc<PipelineMetrics>,
}

impl TaskSubmitter {
    pub fn new(queue: Arc<dyn TaskQueue>, policy: TaskPolicy, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            queue,
            policy: Arc::new(policy),
            metrics,
        }
    }

    pub async fn submit(&self, task: Task) -> Result<(), QueueError> {
        let options = self.policy.options_for(&task);
        debug!(task.name = task.name(), rate_limit = ?options.rate_limit, "submitting task");
        self.queue.submit(task, options).await?;
        self.metrics.record_submitted();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_wire_format() {
        let task = Task::ExecuteStage {
            poll_id: PollId::new(),
            stage: Stage::Mixed,
        };
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["task"], task.name());
        assert_eq!(json["stage"], "mixed");
    }

    #[test]
    fn dispatch_defaults_to_first_run() {
        let election_id = ElectionId::new();
        let json = serde_json::json!({
            "task": "dispatch_stage",
            "election_id": election_id,
            "stage": "create_validated",
        });
        let task: Task = serde_json::from_value(json).unwrap();
        assert_eq!(
            task,
            Task::DispatchStage {
                election_id,
                stage: Stage::CreateValidated,
                redispatch: false,
            }
        );
    }

    #[test]
    fn policy_throttles_mail_but_not_poll_work_by_default() {
        let policy = TaskPolicy::from_config(&crate::config::PipelineConfig::default().tasks).unwrap();
        let execute = Task::ExecuteStage {
            poll_id: PollId::new(),
            stage: Stage::Mixed,
        };
        let cast = Task::SendCastVoteEmail {
            poll_id: PollId::new(),
            voter_id: VoterId::new(),
            signature: "sig".into(),
        };
        assert_eq!(policy.options_for(&execute).rate_limit, None);
        assert_eq!(
            policy.options_for(&cast).rate_limit.map(|l| l.to_string()),
            Some("20/m".to_string())
        );
        assert!(!policy.options_for(&cast).result_expected);

        let trustee = Task::TrusteeEmail {
            trustee_id: TrusteeId::new(),
        };
        assert_eq!(
            policy.options_for(&trustee).rate_limit.map(|l| l.to_string()),
            Some("20/m".to_string())
        );
    }

    #[test]
    fn bad_rates_fail_policy_construction() {
        let mut tasks = crate::config::PipelineConfig::default().tasks;
        tasks.trustee_email_rate = Some("often".into());
        assert!(matches!(
            TaskPolicy::from_config(&tasks),
            Err(QueueError::InvalidRateLimit(_))
        ));
    }
}
