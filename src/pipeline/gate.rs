// Completion gate: has every poll of an election reached a stage?

use std::sync::Arc;

use crate::model::{ElectionId, Poll, PollId, Stage};
use crate::store::{EntityStore, StoreError};

/// True when every poll has reached `stage`. Vacuously true for an
/// election without polls.
pub fn all_reached(polls: &[Poll], stage: Stage) -> bool {
    polls.iter().all(|poll| poll.has_reached(stage))
}

/// Reads committed poll state without taking locks, so two executors that
/// finish at the same time may both see the gate open. Downstream dispatch
/// is deduplicated on the election row.
#[derive(Clone)]
pub struct CompletionGate {
    store: Arc<dyn EntityStore>,
}

impl CompletionGate {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    pub async fn is_ready(&self, election_id: ElectionId, stage: Stage) -> Result<bool, StoreError> {
        let polls = self.store.polls(election_id).await?;
        Ok(all_reached(&polls, stage))
    }

    /// Polls still short of `stage`, in creation order.
    pub async fn pending(&self, election_id: ElectionId, stage: Stage) -> Result<Vec<PollId>, StoreError> {
        let polls = self.store.polls(election_id).await?;
        Ok(polls
            .iter()
            .filter(|poll| !poll.has_reached(stage))
            .map(|poll| poll.id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_election_is_ready_for_anything() {
        for stage in Stage::ALL {
            assert!(all_reached(&[], stage));
        }
    }

    #[test]
    fn polls_past_the_stage_count_as_reached() {
        let election = ElectionId::new();
        let polls = vec![
            Poll::new(election, "a").at_stage(Stage::Mixed),
            Poll::new(election, "b").at_stage(Stage::MixValidated),
        ];
        assert!(all_reached(&polls, Stage::Mixed));
        assert!(!all_reached(&polls, Stage::MixValidated));
    }

    #[tokio::test]
    async fn pending_lists_laggards() {
        let store = Arc::new(crate::store::MemoryStore::default());
        let election = ElectionId::new();
        let done = Poll::new(election, "done").at_stage(Stage::CreateValidated);
        let behind = Poll::new(election, "behind");
        store.insert_poll(done).await;
        store.insert_poll(behind.clone()).await;

        let gate = CompletionGate::new(store);
        assert!(!gate.is_ready(election, Stage::CreateValidated).await.unwrap());
        assert_eq!(
            gate.pending(election, Stage::CreateValidated).await.unwrap(),
            vec![behind.id]
        );
    }
}
