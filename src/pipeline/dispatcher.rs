use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use super::gate::all_reached;
use super::PipelineError;
use crate::model::{Election, ElectionId, PollId, Stage};
use crate::observability::PipelineMetrics;
use crate::queue::{Task, TaskSubmitter};
use crate::store::EntityStore;

/// What happened once a stage's gate was found open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Dispatch for the following stage was enqueued.
    NextStage(Stage),
    /// The last stage finished; `newly` is false if the election was
    /// already stamped complete.
    Completed { newly: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchReport {
    /// The stage had already been fanned out; nothing was enqueued.
    AlreadyDispatched { stage: Stage },
    FannedOut {
        stage: Stage,
        polls: Vec<PollId>,
        /// Set when no poll needed work and the gate was already open.
        advanced: Option<Advance>,
    },
}

/// Fans a stage out to the polls of an election.
#[derive(Clone)]
pub struct StageDispatcher {
    store: Arc<dyn EntityStore>,
    submitter: TaskSubmitter,
    metrics: Arc<PipelineMetrics>,
}

impl StageDispatcher {
    pub fn new(store: Arc<dyn EntityStore>, submitter: TaskSubmitter, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            store,
            submitter,
            metrics,
        }
    }

    /// Enqueue `execute_stage` for every poll eligible for `stage`.
    ///
    /// Runs under the election lock. A stage is fanned out at most once
    /// unless `redispatch` is set; the marker is only committed after every
    /// task was enqueued, so a failed dispatch can simply be resubmitted.
    pub async fn dispatch(
        &self,
        election_id: ElectionId,
        stage: Stage,
        redispatch: bool,
    ) -> Result<DispatchReport, PipelineError> {
        let mut election = self.store.lock_election(election_id).await?;

        if election.has_dispatched(stage) && !redispatch {
            info!(%election_id, %stage, "stage already dispatched, skipping");
            return Ok(DispatchReport::AlreadyDispatched { stage });
        }

        let now = Utc::now();
        if stage == Stage::first() && election.stamp_frozen(now) {
            info!(%election_id, "election frozen");
        }

        let polls = self.store.polls(election_id).await?;
        let mut fanned = Vec::new();
        for poll in polls.iter().filter(|poll| poll.is_eligible_for(stage)) {
            self.submitter
                .submit(Task::ExecuteStage {
                    poll_id: poll.id,
                    stage,
                })
                .await?;
            fanned.push(poll.id);
        }

        if stage == Stage::PartiallyDecrypted {
            self.submitter
                .submit(Task::NotifyTrustees { election_id })
                .await?;
        }

        election.mark_dispatched(stage, now);

        let advanced = if !fanned.is_empty() {
            None
        } else if all_reached(&polls, stage) {
            Some(self.advance(&mut election, stage, now).await?)
        } else {
            warn!(
                %election_id,
                %stage,
                "no poll is eligible but the stage is incomplete; the election will not advance"
            );
            None
        };

        self.store.save_election(election).await?;
        self.metrics.record_dispatch();
        info!(%election_id, %stage, polls = fanned.len(), redispatch, "stage dispatched");

        Ok(DispatchReport::FannedOut {
            stage,
            polls: fanned,
            advanced,
        })
    }

    /// Called once every poll has reached `stage`.
    pub async fn complete_stage(&self, election_id: ElectionId, stage: Stage) -> Result<Advance, PipelineError> {
        if stage.next().is_some() {
            let mut election = self.store.election(election_id).await?;
            return self.advance(&mut election, stage, Utc::now()).await;
        }

        let mut election = self.store.lock_election(election_id).await?;
        let advance = self.advance(&mut election, stage, Utc::now()).await?;
        self.store.save_election(election).await?;
        Ok(advance)
    }

    /// Enqueue the next dispatch, or stamp completion on the terminal stage.
    /// Only the terminal branch mutates `election`.
    async fn advance(
        &self,
        election: &mut Election,
        stage: Stage,
        now: DateTime<Utc>,
    ) -> Result<Advance, PipelineError> {
        match stage.next() {
            Some(next) => {
                self.submitter
                    .submit(Task::DispatchStage {
                        election_id: election.id,
                        stage: next,
                        redispatch: false,
                    })
                    .await?;
                info!(election_id = %election.id, completed = %stage, next = %next, "stage complete");
                Ok(Advance::NextStage(next))
            }
            None => {
                let newly = election.stamp_completed(now);
                if newly {
                    info!(election_id = %election.id, "election completed");
                }
                Ok(Advance::Completed { newly })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Poll;
    use crate::queue::{MemoryQueue, TaskPolicy};
    use crate::store::MemoryStore;

    async fn setup(polls: Vec<Poll>, election: Election) -> (StageDispatcher, Arc<MemoryStore>, Arc<MemoryQueue>) {
        let store = Arc::new(MemoryStore::default());
        store.insert_election(election).await;
        for poll in polls {
            store.insert_poll(poll).await;
        }
        let queue = Arc::new(MemoryQueue::new());
        let metrics = Arc::new(PipelineMetrics::new());
        let submitter = TaskSubmitter::new(queue.clone(), TaskPolicy::default(), metrics.clone());
        (StageDispatcher::new(store.clone(), submitter, metrics), store, queue)
    }

    #[tokio::test]
    async fn first_dispatch_freezes_and_fans_out() {
        let election = Election::new("Board");
        let polls = vec![Poll::new(election.id, "a"), Poll::new(election.id, "b")];
        let ids: Vec<PollId> = polls.iter().map(|p| p.id).collect();
        let (dispatcher, store, queue) = setup(polls, election.clone()).await;

        let report = dispatcher.dispatch(election.id, Stage::CreateValidated, false).await.unwrap();

        assert_eq!(
            report,
            DispatchReport::FannedOut {
                stage: Stage::CreateValidated,
                polls: ids,
                advanced: None
            }
        );
        assert_eq!(queue.len().await, 2);
        let stored = store.election(election.id).await.unwrap();
        assert!(stored.is_frozen());
        assert!(stored.has_dispatched(Stage::CreateValidated));
    }

    #[tokio::test]
    async fn repeated_dispatch_is_a_no_op_unless_forced() {
        let election = Election::new("Board");
        let polls = vec![Poll::new(election.id, "a")];
        let (dispatcher, _store, queue) = setup(polls, election.clone()).await;

        dispatcher.dispatch(election.id, Stage::CreateValidated, false).await.unwrap();
        let again = dispatcher.dispatch(election.id, Stage::CreateValidated, false).await.unwrap();
        assert_eq!(again, DispatchReport::AlreadyDispatched { stage: Stage::CreateValidated });
        assert_eq!(queue.len().await, 1);

        dispatcher.dispatch(election.id, Stage::CreateValidated, true).await.unwrap();
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn failed_enqueue_leaves_stage_undispatched() {
        let election = Election::new("Board");
        let polls = vec![Poll::new(election.id, "a")];
        let (dispatcher, store, queue) = setup(polls, election.clone()).await;

        queue.close();
        let err = dispatcher.dispatch(election.id, Stage::CreateValidated, false).await.unwrap_err();
        assert!(err.is_transient());
        let stored = store.election(election.id).await.unwrap();
        assert!(!stored.has_dispatched(Stage::CreateValidated));
        assert!(!stored.is_frozen());
    }

    #[tokio::test]
    async fn decryption_stage_also_notifies_trustees() {
        let election = Election::new("Board");
        let polls = vec![Poll::new(election.id, "a").at_stage(Stage::MixValidated)];
        let (dispatcher, _store, queue) = setup(polls, election.clone()).await;

        dispatcher.dispatch(election.id, Stage::PartiallyDecrypted, false).await.unwrap();
        let names: Vec<&str> = queue.pending().await.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["execute_stage", "notify_trustees"]);
    }

    #[tokio::test]
    async fn empty_fan_out_moves_straight_to_next_stage() {
        let election = Election::new("Board");
        let polls = vec![
            Poll::new(election.id, "a").at_stage(Stage::PartiallyDecrypted),
            Poll::new(election.id, "b").at_stage(Stage::PartiallyDecrypted),
        ];
        let (dispatcher, store, queue) = setup(polls, election.clone()).await;

        let report = dispatcher.dispatch(election.id, Stage::PartiallyDecrypted, false).await.unwrap();

        assert_eq!(
            report,
            DispatchReport::FannedOut {
                stage: Stage::PartiallyDecrypted,
                polls: vec![],
                advanced: Some(Advance::NextStage(Stage::Decrypted)),
            }
        );
        assert_eq!(
            queue.pending().await,
            vec![
                Task::NotifyTrustees { election_id: election.id },
                Task::DispatchStage {
                    election_id: election.id,
                    stage: Stage::Decrypted,
                    redispatch: false,
                },
            ]
        );
        assert!(store.election(election.id).await.unwrap().has_dispatched(Stage::PartiallyDecrypted));
    }

    #[tokio::test]
    async fn terminal_dispatch_with_nothing_to_do_completes() {
        let election = Election::new("Board");
        let polls = vec![Poll::new(election.id, "a").at_stage(Stage::ResultsComputed)];
        let (dispatcher, store, queue) = setup(polls, election.clone()).await;

        let report = dispatcher.dispatch(election.id, Stage::ResultsComputed, false).await.unwrap();
        assert!(matches!(
            report,
            DispatchReport::FannedOut { advanced: Some(Advance::Completed { newly: true }), .. }
        ));
        assert!(queue.is_empty().await);
        assert!(store.election(election.id).await.unwrap().is_completed());
    }
}
