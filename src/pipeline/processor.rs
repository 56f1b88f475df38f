// Stage-specific work plugged into the executor

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::model::{Poll, PollId, Stage, Trustee, TrusteeId};

/// Decryption factors and proofs submitted by one trustee for one poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialDecryption {
    pub factors: Vec<String>,
    pub proofs: Vec<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    #[error("input rejected: {0}")]
    Rejected(String),
    #[error("proof verification failed: {0}")]
    InvalidProof(String),
    #[error("processing backend unavailable: {0}")]
    Unavailable(String),
}

impl ProcessingError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProcessingError::Unavailable(_))
    }
}

/// The cryptographic and validation work behind each stage.
///
/// Implementations receive the poll while it is locked. Returning an error
/// aborts the transition and discards anything written to the poll.
#[async_trait]
pub trait StageProcessor: Send + Sync {
    async fn validate_create(&self, poll: &mut Poll) -> Result<(), ProcessingError>;
    async fn validate_voting(&self, poll: &mut Poll) -> Result<(), ProcessingError>;
    async fn mix(&self, poll: &mut Poll) -> Result<(), ProcessingError>;
    async fn validate_mixing(&self, poll: &mut Poll) -> Result<(), ProcessingError>;
    /// Partial decryption on behalf of a trustee whose key the server holds.
    async fn partial_decrypt(&self, poll: &mut Poll, trustee: &Trustee) -> Result<(), ProcessingError>;
    /// Verify and store factors submitted by an external trustee.
    async fn apply_partial_decrypt(
        &self,
        poll: &mut Poll,
        trustee: &Trustee,
        submission: &PartialDecryption,
    ) -> Result<(), ProcessingError>;
    async fn decrypt(&self, poll: &mut Poll) -> Result<(), ProcessingError>;
    async fn compute_results(&self, poll: &mut Poll) -> Result<(), ProcessingError>;
}

/// Processor that performs no cryptography. Every step succeeds unless a
/// failure was injected for that poll and stage.
#[derive(Default)]
pub struct SimulatedProcessor {
    failures: Mutex<HashSet<(PollId, Stage)>>,
    rejected_trustees: Mutex<HashSet<TrusteeId>>,
    calls: Mutex<Vec<(PollId, Stage)>>,
    delay: Duration,
}

impl SimulatedProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every step, widening race windows in tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub async fn fail_on(&self, poll_id: PollId, stage: Stage) {
        self.failures.lock().await.insert((poll_id, stage));
    }

    pub async fn clear_failure(&self, poll_id: PollId, stage: Stage) {
        self.failures.lock().await.remove(&(poll_id, stage));
    }

    pub async fn reject_trustee(&self, trustee_id: TrusteeId) {
        self.rejected_trustees.lock().await.insert(trustee_id);
    }

    pub async fn calls(&self) -> Vec<(PollId, Stage)> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self, poll_id: PollId, stage: Stage) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| **call == (poll_id, stage))
            .count()
    }

    async fn step(&self, poll: &Poll, stage: Stage) -> Result<(), ProcessingError> {
        self.calls.lock().await.push((poll.id, stage));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failures.lock().await.contains(&(poll.id, stage)) {
            return Err(ProcessingError::Rejected(format!(
                "{} failed for poll {}",
                stage.step_name(),
                poll.name
            )));
        }
        debug!(poll_id = %poll.id, step = stage.step_name(), "simulated step done");
        Ok(())
    }
}

#[async_trait]
impl StageProcessor for SimulatedProcessor {
    async fn validate_create(&self, poll: &mut Poll) -> Result<(), ProcessingError> {
        self.step(poll, Stage::CreateValidated).await
    }

    async fn validate_voting(&self, poll: &mut Poll) -> Result<(), ProcessingError> {
        self.step(poll, Stage::VotingValidated).await
    }

    async fn mix(&self, poll: &mut Poll) -> Result<(), ProcessingError> {
        self.step(poll, Stage::Mixed).await
    }

    async fn validate_mixing(&self, poll: &mut Poll) -> Result<(), ProcessingError> {
        self.step(poll, Stage::MixValidated).await
    }

    async fn partial_decrypt(&self, poll: &mut Poll, _trustee: &Trustee) -> Result<(), ProcessingError> {
        self.step(poll, Stage::PartiallyDecrypted).await
    }

    async fn apply_partial_decrypt(
        &self,
        poll: &mut Poll,
        trustee: &Trustee,
        submission: &PartialDecryption,
    ) -> Result<(), ProcessingError> {
        if submission.factors.is_empty() || submission.factors.len() != submission.proofs.len() {
            return Err(ProcessingError::InvalidProof(format!(
                "trustee {} sent {} factors and {} proofs",
                trustee.name,
                submission.factors.len(),
                submission.proofs.len()
            )));
        }
        if self.rejected_trustees.lock().await.contains(&trustee.id) {
            return Err(ProcessingError::InvalidProof(format!(
                "proofs from trustee {} do not verify",
                trustee.name
            )));
        }
        self.step(poll, Stage::PartiallyDecrypted).await
    }

    async fn decrypt(&self, poll: &mut Poll) -> Result<(), ProcessingError> {
        self.step(poll, Stage::Decrypted).await
    }

    async fn compute_results(&self, poll: &mut Poll) -> Result<(), ProcessingError> {
        self.step(poll, Stage::ResultsComputed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ElectionId;

    #[tokio::test]
    async fn injected_failures_are_per_poll_and_stage() {
        let processor = SimulatedProcessor::new();
        let mut poll = Poll::new(ElectionId::new(), "Chair");
        processor.fail_on(poll.id, Stage::Mixed).await;

        assert!(processor.validate_create(&mut poll).await.is_ok());
        assert!(matches!(
            processor.mix(&mut poll).await,
            Err(ProcessingError::Rejected(_))
        ));

        processor.clear_failure(poll.id, Stage::Mixed).await;
        assert!(processor.mix(&mut poll).await.is_ok());
        assert_eq!(processor.call_count(poll.id, Stage::Mixed).await, 2);
    }

    #[tokio::test]
    async fn mismatched_submission_fails_verification() {
        let processor = SimulatedProcessor::new();
        let mut poll = Poll::new(ElectionId::new(), "Chair");
        let trustee = Trustee::new(poll.election_id, "Tess", "tess@example.org");
        let submission = PartialDecryption {
            factors: vec!["f1".into(), "f2".into()],
            proofs: vec!["p1".into()],
        };

        let err = processor
            .apply_partial_decrypt(&mut poll, &trustee, &submission)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::InvalidProof(_)));
        assert!(!err.is_transient());
    }
}
