// In-memory entity store with per-row pessimistic locks
//
// Committed rows live behind an RwLock that is only held for the duration
// of a copy in or out; row locks are separate tokio mutexes, so readers
// never block on a writer's open transaction.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use super::{EntityStore, RowLock, StoreError};
use crate::model::{Election, ElectionId, Poll, PollId, Trustee, TrusteeId, Voter, VoterId};
use crate::notify::VoterFilter;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

pub trait Record: Clone + Send + Sync + 'static {
    type Id: Copy + Ord + Hash + Display + Send + Sync + 'static;
    const KIND: &'static str;

    fn record_id(&self) -> Self::Id;
}

impl Record for Election {
    type Id = ElectionId;
    const KIND: &'static str = "election";

    fn record_id(&self) -> ElectionId {
        self.id
    }
}

impl Record for Poll {
    type Id = PollId;
    const KIND: &'static str = "poll";

    fn record_id(&self) -> PollId {
        self.id
    }
}

impl Record for Voter {
    type Id = VoterId;
    const KIND: &'static str = "voter";

    fn record_id(&self) -> VoterId {
        self.id
    }
}

impl Record for Trustee {
    type Id = TrusteeId;
    const KIND: &'static str = "trustee";

    fn record_id(&self) -> TrusteeId {
        self.id
    }
}

struct Row<R> {
    seq: u64,
    record: R,
}

struct Table<R: Record> {
    rows: RwLock<BTreeMap<R::Id, Row<R>>>,
    locks: Mutex<HashMap<R::Id, Arc<Mutex<()>>>>,
    next_seq: AtomicU64,
}

impl<R: Record> Default for Table<R> {
    fn default() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            locks: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }
}

impl<R: Record> Table<R> {
    fn not_found(id: R::Id) -> StoreError {
        StoreError::NotFound {
            entity: R::KIND,
            id: id.to_string(),
        }
    }

    async fn insert(&self, record: R) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut rows = self.rows.write().await;
        rows.insert(record.record_id(), Row { seq, record });
    }

    async fn get(&self, id: R::Id) -> Result<R, StoreError> {
        let rows = self.rows.read().await;
        rows.get(&id)
            .map(|row| row.record.clone())
            .ok_or_else(|| Self::not_found(id))
    }

    async fn scan<F>(&self, predicate: F) -> Vec<R>
    where
        F: Fn(&R) -> bool,
    {
        let rows = self.rows.read().await;
        let mut matching: Vec<&Row<R>> = rows.values().filter(|row| predicate(&row.record)).collect();
        matching.sort_by_key(|row| row.seq);
        matching.into_iter().map(|row| row.record.clone()).collect()
    }

    async fn lock(&self, id: R::Id, timeout: Duration) -> Result<RowLock<R>, StoreError> {
        // Fail fast on unknown rows instead of waiting on a lock nobody holds.
        self.get(id).await?;

        let row_mutex = {
            let mut locks = self.locks.lock().await;
            // Clones are only taken under this mutex, so a count of one
            // means no holder and no waiter.
            locks.retain(|_, row| Arc::strong_count(row) > 1);
            locks.entry(id).or_default().clone()
        };

        let guard = tokio::time::timeout(timeout, row_mutex.lock_owned())
            .await
            .map_err(|_| {
                warn!(entity = R::KIND, id = %id, "row lock wait timed out");
                StoreError::LockTimeout {
                    entity: R::KIND,
                    id: id.to_string(),
                    waited_ms: timeout.as_millis() as u64,
                }
            })?;

        // Read under the lock so the holder sees the latest committed state.
        let record = self.get(id).await?;
        debug!(entity = R::KIND, id = %id, "row locked");
        Ok(RowLock::new(record, guard))
    }

    async fn save(&self, lock: RowLock<R>) -> Result<(), StoreError> {
        let (record, guard) = lock.into_parts();
        let id = record.record_id();
        {
            let mut rows = self.rows.write().await;
            let row = rows.get_mut(&id).ok_or_else(|| Self::not_found(id))?;
            row.record = record;
        }
        drop(guard);
        debug!(entity = R::KIND, id = %id, "row committed");
        Ok(())
    }
}

/// [`EntityStore`] kept entirely in process memory.
pub struct MemoryStore {
    elections: Table<Election>,
    polls: Table<Poll>,
    voters: Table<Voter>,
    trustees: Table<Trustee>,
    lock_timeout: Duration,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

impl MemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            elections: Table::default(),
            polls: Table::default(),
            voters: Table::default(),
            trustees: Table::default(),
            lock_timeout,
            available: AtomicBool::new(true),
        }
    }

    pub async fn insert_election(&self, election: Election) {
        self.elections.insert(election).await;
    }

    pub async fn insert_poll(&self, poll: Poll) {
        self.polls.insert(poll).await;
    }

    pub async fn insert_voter(&self, voter: Voter) {
        self.voters.insert(voter).await;
    }

    pub async fn insert_trustee(&self, trustee: Trustee) {
        self.trustees.insert(trustee).await;
    }

    /// Simulates an outage: every call fails with [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store switched off".to_string()))
        }
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn election(&self, id: ElectionId) -> Result<Election, StoreError> {
        self.ensure_available()?;
        self.elections.get(id).await
    }

    async fn lock_election(&self, id: ElectionId) -> Result<RowLock<Election>, StoreError> {
        self.ensure_available()?;
        self.elections.lock(id, self.lock_timeout).await
    }

    async fn save_election(&self, lock: RowLock<Election>) -> Result<(), StoreError> {
        self.ensure_available()?;
        self.elections.save(lock).await
    }

    async fn poll(&self, id: PollId) -> Result<Poll, StoreError> {
        self.ensure_available()?;
        self.polls.get(id).await
    }

    async fn polls(&self, election: ElectionId) -> Result<Vec<Poll>, StoreError> {
        self.ensure_available()?;
        Ok(self.polls.scan(|poll| poll.election_id == election).await)
    }

    async fn lock_poll(&self, id: PollId) -> Result<RowLock<Poll>, StoreError> {
        self.ensure_available()?;
        self.polls.lock(id, self.lock_timeout).await
    }

    async fn save_poll(&self, lock: RowLock<Poll>) -> Result<(), StoreError> {
        self.ensure_available()?;
        self.polls.save(lock).await
    }

    async fn voter(&self, id: VoterId) -> Result<Voter, StoreError> {
        self.ensure_available()?;
        self.voters.get(id).await
    }

    async fn voters(&self, poll: PollId, filter: &VoterFilter) -> Result<Vec<Voter>, StoreError> {
        self.ensure_available()?;
        Ok(self
            .voters
            .scan(|voter| voter.poll_id == poll && filter.matches(voter))
            .await)
    }

    async fn lock_voter(&self, id: VoterId) -> Result<RowLock<Voter>, StoreError> {
        self.ensure_available()?;
        self.voters.lock(id, self.lock_timeout).await
    }

    async fn save_voter(&self, lock: RowLock<Voter>) -> Result<(), StoreError> {
        self.ensure_available()?;
        self.voters.save(lock).await
    }

    async fn trustee(&self, id: TrusteeId) -> Result<Trustee, StoreError> {
        self.ensure_available()?;
        self.trustees.get(id).await
    }

    async fn trustees(&self, election: ElectionId) -> Result<Vec<Trustee>, StoreError> {
        self.ensure_available()?;
        Ok(self
            .trustees
            .scan(|trustee| trustee.election_id == election)
            .await)
    }

    async fn lock_trustee(&self, id: TrusteeId) -> Result<RowLock<Trustee>, StoreError> {
        self.ensure_available()?;
        self.trustees.lock(id, self.lock_timeout).await
    }

    async fn save_trustee(&self, lock: RowLock<Trustee>) -> Result<(), StoreError> {
        self.ensure_available()?;
        self.trustees.save(lock).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Stage;

    async fn store_with_poll() -> (MemoryStore, Poll) {
        let store = MemoryStore::new(Duration::from_millis(50));
        let election = Election::new("Board");
        let poll = Poll::new(election.id, "Chair");
        store.insert_election(election).await;
        store.insert_poll(poll.clone()).await;
        (store, poll)
    }

    #[tokio::test]
    async fn unsaved_changes_are_discarded() {
        let (store, poll) = store_with_poll().await;

        let mut lock = store.lock_poll(poll.id).await.unwrap();
        lock.stage = Some(Stage::CreateValidated);
        drop(lock);

        assert_eq!(store.poll(poll.id).await.unwrap().stage, None);
    }

    #[tokio::test]
    async fn released_row_locks_are_forgotten() {
        let (store, poll) = store_with_poll().await;
        for name in ["a", "b", "c"] {
            let other = Poll::new(poll.election_id, name);
            store.insert_poll(other.clone()).await;
            let lock = store.lock_poll(other.id).await.unwrap();
            store.save_poll(lock).await.unwrap();
        }

        let held = store.lock_poll(poll.id).await.unwrap();
        assert_eq!(store.polls.locks.lock().await.len(), 1);
        drop(held);

        let lock = store.lock_poll(poll.id).await.unwrap();
        store.save_poll(lock).await.unwrap();
        assert_eq!(store.polls.locks.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn saved_changes_are_visible_to_readers() {
        let (store, poll) = store_with_poll().await;

        let mut lock = store.lock_poll(poll.id).await.unwrap();
        lock.stage = Some(Stage::CreateValidated);
        // Readers see the committed value while the lock is still open.
        assert_eq!(store.poll(poll.id).await.unwrap().stage, None);
        store.save_poll(lock).await.unwrap();

        assert_eq!(
            store.poll(poll.id).await.unwrap().stage,
            Some(Stage::CreateValidated)
        );
    }

    #[tokio::test]
    async fn second_locker_times_out_while_row_is_held() {
        let (store, poll) = store_with_poll().await;

        let _held = store.lock_poll(poll.id).await.unwrap();
        let err = store.lock_poll(poll.id).await.unwrap_err();

        assert!(matches!(err, StoreError::LockTimeout { entity: "poll", .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn locks_on_different_rows_do_not_contend() {
        let store = MemoryStore::new(Duration::from_millis(50));
        let election = Election::new("Board");
        let first = Poll::new(election.id, "A");
        let second = Poll::new(election.id, "B");
        store.insert_poll(first.clone()).await;
        store.insert_poll(second.clone()).await;

        let _a = store.lock_poll(first.id).await.unwrap();
        assert!(store.lock_poll(second.id).await.is_ok());
    }

    #[tokio::test]
    async fn polls_come_back_in_creation_order() {
        let store = MemoryStore::default();
        let election = Election::new("Board");
        let names = ["zeta", "alpha", "mu"];
        for name in names {
            store.insert_poll(Poll::new(election.id, name)).await;
        }
        store.insert_poll(Poll::new(ElectionId::new(), "other")).await;

        let polls = store.polls(election.id).await.unwrap();
        let got: Vec<&str> = polls.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(got, names);
    }

    #[tokio::test]
    async fn unknown_rows_and_outages_are_reported() {
        let store = MemoryStore::default();
        let missing = store.lock_poll(PollId::new()).await.unwrap_err();
        assert!(matches!(missing, StoreError::NotFound { entity: "poll", .. }));

        store.set_available(false);
        let down = store.polls(ElectionId::new()).await.unwrap_err();
        assert!(matches!(down, StoreError::Unavailable(_)));
    }
}
