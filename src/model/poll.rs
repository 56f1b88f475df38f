use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use super::{ElectionId, PollId, Stage, TrusteeId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("poll {poll_id} cannot move from {from:?} to {to}")]
    OutOfOrder {
        poll_id: PollId,
        from: Option<Stage>,
        to: Stage,
    },
}

/// A unit of work owned by exactly one election.
///
/// `stage` is the last stage the poll has completed; `None` means no stage
/// has run yet. Eligibility is derived from it rather than stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub id: PollId,
    pub election_id: ElectionId,
    pub name: String,
    pub stage: Option<Stage>,
    /// Trustees whose partial decryption has been recorded for this poll.
    pub partial_decryptions: BTreeSet<TrusteeId>,
}

impl Poll {
    pub fn new(election_id: ElectionId, name: impl Into<String>) -> Self {
        Self {
            id: PollId::new(),
            election_id,
            name: name.into(),
            stage: None,
            partial_decryptions: BTreeSet::new(),
        }
    }

    /// Builder used when seeding a poll that is already part-way through.
    pub fn at_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn has_reached(&self, stage: Stage) -> bool {
        self.stage.is_some_and(|current| current >= stage)
    }

    /// True when the poll sits exactly one step before `stage`.
    pub fn is_eligible_for(&self, stage: Stage) -> bool {
        self.stage == stage.previous()
    }

    /// Moves the poll forward by exactly one stage.
    pub fn advance_to(&mut self, stage: Stage) -> Result<(), TransitionError> {
        if !self.is_eligible_for(stage) {
            return Err(TransitionError::OutOfOrder {
                poll_id: self.id,
                from: self.stage,
                to: stage,
            });
        }
        self.stage = Some(stage);
        Ok(())
    }

    /// Returns false if the trustee was already recorded.
    pub fn record_partial_decryption(&mut self, trustee: TrusteeId) -> bool {
        self.partial_decryptions.insert(trustee)
    }

    pub fn has_partial_decryption_from(&self, trustee: TrusteeId) -> bool {
        self.partial_decryptions.contains(&trustee)
    }

    pub fn has_all_partial_decryptions<I>(&self, trustees: I) -> bool
    where
        I: IntoIterator<Item = TrusteeId>,
    {
        trustees
            .into_iter()
            .all(|trustee| self.partial_decryptions.contains(&trustee))
    }
}
