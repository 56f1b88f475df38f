use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{ElectionId, Stage};

/// Top-level aggregate. Polls reference it by id; it never stores them.
///
/// Milestones are write-once: the `stamp_*` helpers refuse to overwrite a
/// value that is already set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Election {
    pub id: ElectionId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub frozen_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// When each stage's fan-out was committed.
    pub dispatched: BTreeMap<Stage, DateTime<Utc>>,
}

impl Election {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ElectionId::new(),
            name: name.into(),
            created_at: Utc::now(),
            frozen_at: None,
            completed_at: None,
            dispatched: BTreeMap::new(),
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen_at.is_some()
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn has_dispatched(&self, stage: Stage) -> bool {
        self.dispatched.contains_key(&stage)
    }

    /// Returns true when this call set the timestamp.
    pub fn stamp_frozen(&mut self, at: DateTime<Utc>) -> bool {
        stamp_once(&mut self.frozen_at, at)
    }

    pub fn stamp_completed(&mut self, at: DateTime<Utc>) -> bool {
        stamp_once(&mut self.completed_at, at)
    }

    /// Records a dispatch. A redispatch keeps the original timestamp.
    pub fn mark_dispatched(&mut self, stage: Stage, at: DateTime<Utc>) {
        self.dispatched.entry(stage).or_insert(at);
    }

    /// Latest stage whose fan-out has been committed.
    pub fn last_dispatched(&self) -> Option<Stage> {
        self.dispatched.keys().next_back().copied()
    }
}

fn stamp_once(slot: &mut Option<DateTime<Utc>>, at: DateTime<Utc>) -> bool {
    if slot.is_some() {
        return false;
    }
    *slot = Some(at);
    true
}
