//! Entity store abstraction
//!
//! The pipeline never touches persistence directly. It reads committed
//! snapshots and mutates records through a [`RowLock`], an exclusive
//! per-row handle that stays held until the record is saved or dropped.
//! Dropping a lock without saving discards the pending changes.

pub mod memory;

use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::ops::{Deref, DerefMut};
use thiserror::Error;

use crate::model::{Election, ElectionId, Poll, PollId, Trustee, TrusteeId, Voter, VoterId};
use crate::notify::VoterFilter;

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("timed out after {waited_ms}ms waiting for the lock on {entity} {id}")]
    LockTimeout {
        entity: &'static str,
        id: String,
        waited_ms: u64,
    },
    #[error("entity store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Lock contention and outages clear up on their own; resubmitting the
    /// task is safe because every handler re-checks state first.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::LockTimeout { .. } | StoreError::Unavailable(_))
    }
}

/// Exclusive hold on one stored record.
pub struct RowLock<T> {
    record: T,
    guard: Box<dyn Any + Send + Sync>,
}

impl<T> RowLock<T> {
    /// `guard` is whatever keeps the row locked; it is released when the
    /// lock is saved or dropped.
    pub fn new<G>(record: T, guard: G) -> Self
    where
        G: Any + Send + Sync,
    {
        Self {
            record,
            guard: Box::new(guard),
        }
    }

    pub fn into_parts(self) -> (T, Box<dyn Any + Send + Sync>) {
        (self.record, self.guard)
    }
}

impl<T> Deref for RowLock<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.record
    }
}

impl<T> DerefMut for RowLock<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.record
    }
}

impl<T: fmt::Debug> fmt::Debug for RowLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowLock").field("record", &self.record).finish()
    }
}

/// Storage consumed by the dispatcher, executor and notifier.
///
/// Reads return the last committed state and never wait on row locks.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn election(&self, id: ElectionId) -> Result<Election, StoreError>;
    async fn lock_election(&self, id: ElectionId) -> Result<RowLock<Election>, StoreError>;
    async fn save_election(&self, lock: RowLock<Election>) -> Result<(), StoreError>;

    async fn poll(&self, id: PollId) -> Result<Poll, StoreError>;
    /// Polls of an election in creation order.
    async fn polls(&self, election: ElectionId) -> Result<Vec<Poll>, StoreError>;
    async fn lock_poll(&self, id: PollId) -> Result<RowLock<Poll>, StoreError>;
    async fn save_poll(&self, lock: RowLock<Poll>) -> Result<(), StoreError>;

    async fn voter(&self, id: VoterId) -> Result<Voter, StoreError>;
    /// Voters of a poll matching `filter`, in creation order.
    async fn voters(&self, poll: PollId, filter: &VoterFilter) -> Result<Vec<Voter>, StoreError>;
    async fn lock_voter(&self, id: VoterId) -> Result<RowLock<Voter>, StoreError>;
    async fn save_voter(&self, lock: RowLock<Voter>) -> Result<(), StoreError>;

    async fn trustee(&self, id: TrusteeId) -> Result<Trustee, StoreError>;
    async fn trustees(&self, election: ElectionId) -> Result<Vec<Trustee>, StoreError>;
    async fn lock_trustee(&self, id: TrusteeId) -> Result<RowLock<Trustee>, StoreError>;
    async fn save_trustee(&self, lock: RowLock<Trustee>) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_lock_derefs_to_record() {
        let mut lock = RowLock::new(41_u32, ());
        *lock += 1;
        assert_eq!(*lock, 42);
        let (record, _guard) = lock.into_parts();
        assert_eq!(record, 42);
    }

    #[test]
    fn transient_errors_are_classified() {
        let timeout = StoreError::LockTimeout {
            entity: "poll",
            id: "p".into(),
            waited_ms: 10,
        };
        let missing = StoreError::NotFound {
            entity: "poll",
            id: "p".into(),
        };
        assert!(timeout.is_transient());
        assert!(StoreError::Unavailable("down".into()).is_transient());
        assert!(!missing.is_transient());
    }
}
