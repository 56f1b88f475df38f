use std::sync::Arc;
use tracing::{info, warn};

use super::dispatcher::{Advance, StageDispatcher};
use super::gate::CompletionGate;
use super::processor::{PartialDecryption, ProcessingError, StageProcessor};
use super::PipelineError;
use crate::model::{ElectionId, Poll, PollId, Stage, Trustee, TrusteeId};
use crate::observability::PipelineMetrics;
use crate::store::{EntityStore, RowLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// Some poll of the election has not reached the stage yet.
    Waiting,
    Open(Advance),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The poll moved into `stage` and the gate was evaluated.
    Advanced {
        poll_id: PollId,
        stage: Stage,
        gate: GateOutcome,
    },
    /// A partial decryption was stored but other trustees are outstanding.
    Recorded { poll_id: PollId, outstanding: usize },
    /// Redelivery of work that already happened; nothing was changed.
    AlreadyApplied { poll_id: PollId, stage: Stage },
    /// The poll was already at `stage` but the follow-up of the earlier
    /// delivery never landed; it was issued again.
    Resumed {
        poll_id: PollId,
        stage: Stage,
        advance: Advance,
    },
    /// The poll is not one step before `stage`; nothing was changed.
    NotEligible {
        poll_id: PollId,
        stage: Stage,
        current: Option<Stage>,
    },
}

/// Moves single polls through a stage.
#[derive(Clone)]
pub struct StageExecutor {
    store: Arc<dyn EntityStore>,
    processor: Arc<dyn StageProcessor>,
    gate: CompletionGate,
    dispatcher: StageDispatcher,
    metrics: Arc<PipelineMetrics>,
}

impl StageExecutor {
    pub fn new(
        store: Arc<dyn EntityStore>,
        processor: Arc<dyn StageProcessor>,
        dispatcher: StageDispatcher,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            gate: CompletionGate::new(store.clone()),
            store,
            processor,
            dispatcher,
            metrics,
        }
    }

    /// Run the step producing `stage` for one poll.
    ///
    /// Idempotent: a poll already at or past `stage` is left alone. The gate
    /// is only re-evaluated when the poll sits exactly at `stage` and the
    /// election has not recorded the follow-up yet, so resubmitting a task
    /// whose follow-up failed finishes the job while later redeliveries stay
    /// inert.
    pub async fn execute(&self, poll_id: PollId, stage: Stage) -> Result<ExecutionOutcome, PipelineError> {
        let mut poll = self.store.lock_poll(poll_id).await?;

        if let Some(outcome) = self.skip(&poll, stage) {
            return self.after_skip(poll, stage, outcome).await;
        }

        let election_id = poll.election_id;
        let outstanding = match stage {
            Stage::PartiallyDecrypted => self.decrypt_locally(&mut poll).await?,
            _ => {
                self.run_step(stage, &mut poll)
                    .await
                    .map_err(|source| PipelineError::Processing {
                        poll_id,
                        stage,
                        source,
                    })?;
                0
            }
        };

        self.settle(poll, election_id, stage, outstanding).await
    }

    /// Record one external trustee's partial decryption for a poll.
    pub async fn add_trustee_factors(
        &self,
        poll_id: PollId,
        trustee_id: TrusteeId,
        submission: &PartialDecryption,
    ) -> Result<ExecutionOutcome, PipelineError> {
        let stage = Stage::PartiallyDecrypted;
        let trustee = self.store.trustee(trustee_id).await?;
        let mut poll = self.store.lock_poll(poll_id).await?;

        if trustee.election_id != poll.election_id {
            return Err(PipelineError::ForeignTrustee { trustee_id, poll_id });
        }
        if poll.has_partial_decryption_from(trustee_id) && !poll.has_reached(stage) {
            info!(%poll_id, %trustee_id, "partial decryption already recorded");
            self.metrics.record_duplicate_execution();
            return Ok(ExecutionOutcome::AlreadyApplied { poll_id, stage });
        }
        if let Some(outcome) = self.skip(&poll, stage) {
            return self.after_skip(poll, stage, outcome).await;
        }

        self.processor
            .apply_partial_decrypt(&mut poll, &trustee, submission)
            .await
            .map_err(|source| PipelineError::Processing {
                poll_id,
                stage,
                source,
            })?;
        poll.record_partial_decryption(trustee_id);

        let trustees = self.store.trustees(poll.election_id).await?;
        let outstanding = outstanding_trustees(&poll, &trustees);
        let election_id = poll.election_id;
        self.settle(poll, election_id, stage, outstanding).await
    }

    fn skip(&self, poll: &Poll, stage: Stage) -> Option<ExecutionOutcome> {
        if poll.has_reached(stage) {
            info!(poll_id = %poll.id, %stage, "poll already reached stage, skipping");
            self.metrics.record_duplicate_execution();
            return Some(ExecutionOutcome::AlreadyApplied {
                poll_id: poll.id,
                stage,
            });
        }
        if !poll.is_eligible_for(stage) {
            warn!(
                poll_id = %poll.id,
                %stage,
                current = ?poll.stage,
                "poll not eligible for stage, skipping"
            );
            return Some(ExecutionOutcome::NotEligible {
                poll_id: poll.id,
                stage,
                current: poll.stage,
            });
        }
        None
    }

    /// Release the untouched poll, then re-issue the stage follow-up if the
    /// poll is exactly at `stage` and the election never recorded it.
    async fn after_skip(
        &self,
        poll: RowLock<Poll>,
        stage: Stage,
        outcome: ExecutionOutcome,
    ) -> Result<ExecutionOutcome, PipelineError> {
        let at_stage = poll.stage == Some(stage);
        let (poll_id, election_id) = (poll.id, poll.election_id);
        drop(poll);

        if !at_stage || !matches!(outcome, ExecutionOutcome::AlreadyApplied { .. }) {
            return Ok(outcome);
        }

        let election = self.store.election(election_id).await?;
        let followed_up = match stage.next() {
            Some(next) => election.has_dispatched(next),
            None => election.is_completed(),
        };
        if followed_up || !self.gate.is_ready(election_id, stage).await? {
            return Ok(outcome);
        }

        info!(%poll_id, %stage, "stage follow-up missing, issuing it again");
        let advance = self.dispatcher.complete_stage(election_id, stage).await?;
        Ok(ExecutionOutcome::Resumed {
            poll_id,
            stage,
            advance,
        })
    }

    async fn run_step(&self, stage: Stage, poll: &mut Poll) -> Result<(), ProcessingError> {
        match stage {
            Stage::CreateValidated => self.processor.validate_create(poll).await,
            Stage::VotingValidated => self.processor.validate_voting(poll).await,
            Stage::Mixed => self.processor.mix(poll).await,
            Stage::MixValidated => self.processor.validate_mixing(poll).await,
            Stage::PartiallyDecrypted => Ok(()),
            Stage::Decrypted => self.processor.decrypt(poll).await,
            Stage::ResultsComputed => self.processor.compute_results(poll).await,
        }
    }

    /// Decrypt for every local trustee not yet recorded. Returns how many
    /// trustees are still outstanding afterwards.
    async fn decrypt_locally(&self, poll: &mut RowLock<Poll>) -> Result<usize, PipelineError> {
        let poll_id = poll.id;
        let trustees = self.store.trustees(poll.election_id).await?;
        let local: Vec<&Trustee> = trustees
            .iter()
            .filter(|t| t.is_local && !poll.has_partial_decryption_from(t.id))
            .collect();
        for trustee in local {
            self.processor
                .partial_decrypt(poll, trustee)
                .await
                .map_err(|source| PipelineError::Processing {
                    poll_id,
                    stage: Stage::PartiallyDecrypted,
                    source,
                })?;
            poll.record_partial_decryption(trustee.id);
        }
        Ok(outstanding_trustees(poll, &trustees))
    }

    /// Commit the poll, advancing it when nothing is outstanding, then
    /// release the lock and evaluate the gate.
    async fn settle(
        &self,
        mut poll: RowLock<Poll>,
        election_id: ElectionId,
        stage: Stage,
        outstanding: usize,
    ) -> Result<ExecutionOutcome, PipelineError> {
        let poll_id = poll.id;
        if outstanding > 0 {
            self.store.save_poll(poll).await?;
            info!(%poll_id, outstanding, "partial decryptions still outstanding");
            return Ok(ExecutionOutcome::Recorded { poll_id, outstanding });
        }

        poll.advance_to(stage)?;
        self.store.save_poll(poll).await?;
        self.metrics.record_stage_transition();
        info!(%poll_id, %stage, "poll advanced");

        let gate = if self.gate.is_ready(election_id, stage).await? {
            GateOutcome::Open(self.dispatcher.complete_stage(election_id, stage).await?)
        } else {
            GateOutcome::Waiting
        };

        Ok(ExecutionOutcome::Advanced { poll_id, stage, gate })
    }
}

fn outstanding_trustees(poll: &Poll, trustees: &[Trustee]) -> usize {
    trustees
        .iter()
        .filter(|t| !poll.has_partial_decryption_from(t.id))
        .count()
}
