// In-process FIFO queue feeding the worker pool

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace};
use uuid::Uuid;

use super::{QueueError, SubmitOptions, Task, TaskQueue};
use crate::telemetry::generate_correlation_id;

/// A task plus its delivery metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub id: Uuid,
    pub task: Task,
    pub options: SubmitOptions,
    pub correlation_id: String,
    /// 1 on first delivery, incremented on each redelivery.
    pub delivery: u32,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Envelope>,
    in_flight: usize,
}

pub struct MemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    closed: AtomicBool,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Refuse further submissions; already queued tasks stay deliverable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    /// Take the next task, marking it in flight until [`MemoryQueue::ack`].
    pub async fn pop(&self) -> Option<Envelope> {
        let mut state = self.state.lock().await;
        let envelope = state.pending.pop_front()?;
        state.in_flight += 1;
        trace!(task.name = envelope.task.name(), task.id = %envelope.id, "task taken");
        Some(envelope)
    }

    pub async fn ack(&self) {
        let mut state = self.state.lock().await;
        state.in_flight = state.in_flight.saturating_sub(1);
        drop(state);
        self.notify.notify_waiters();
    }

    /// Put a delivered task back for a second delivery.
    pub async fn redeliver(&self, mut envelope: Envelope) {
        envelope.delivery += 1;
        debug!(task.name = envelope.task.name(), task.id = %envelope.id, delivery = envelope.delivery, "redelivering task");
        self.state.lock().await.pending.push_back(envelope);
        self.notify.notify_waiters();
    }

    /// Nothing queued and nothing being worked on.
    pub async fn is_idle(&self) -> bool {
        let state = self.state.lock().await;
        state.pending.is_empty() && state.in_flight == 0
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Copies of the queued tasks in delivery order.
    pub async fn pending(&self) -> Vec<Task> {
        let state = self.state.lock().await;
        state.pending.iter().map(|e| e.task.clone()).collect()
    }

    /// Remove and return everything queued.
    pub async fn drain(&self) -> Vec<Envelope> {
        self.state.lock().await.pending.drain(..).collect()
    }

    pub fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }

    pub fn wake_all(&self) {
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn submit(&self, task: Task, options: SubmitOptions) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        if options.result_expected {
            return Err(QueueError::ResultsUnsupported);
        }
        let envelope = Envelope {
            id: Uuid::new_v4(),
            task,
            options,
            correlation_id: generate_correlation_id(),
            delivery: 1,
            enqueued_at: Utc::now(),
        };
        trace!(task.name = envelope.task.name(), task.id = %envelope.id, "task queued");
        self.state.lock().await.pending.push_back(envelope);
        self.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ElectionId, Stage};

    fn dispatch() -> Task {
        Task::DispatchStage {
            election_id: ElectionId::new(),
            stage: Stage::CreateValidated,
            redispatch: false,
        }
    }

    #[tokio::test]
    async fn in_flight_tasks_keep_queue_busy() {
        let queue = MemoryQueue::new();
        queue.submit(dispatch(), SubmitOptions::default()).await.unwrap();

        let envelope = queue.pop().await.unwrap();
        assert_eq!(envelope.delivery, 1);
        assert!(queue.is_empty().await);
        assert!(!queue.is_idle().await);

        queue.ack().await;
        assert!(queue.is_idle().await);
    }

    #[tokio::test]
    async fn closed_queue_refuses_submissions() {
        let queue = MemoryQueue::new();
        queue.close();
        let err = queue.submit(dispatch(), SubmitOptions::default()).await.unwrap_err();
        assert!(matches!(err, QueueError::Closed));
        assert!(err.is_transient());

        queue.reopen();
        assert!(queue.submit(dispatch(), SubmitOptions::default()).await.is_ok());
    }

    #[tokio::test]
    async fn result_tracking_is_refused() {
        let queue = MemoryQueue::new();
        let options = SubmitOptions {
            rate_limit: None,
            result_expected: true,
        };
        assert!(matches!(
            queue.submit(dispatch(), options).await,
            Err(QueueError::ResultsUnsupported)
        ));
    }

    #[tokio::test]
    async fn redelivery_bumps_attempt() {
        let queue = MemoryQueue::new();
        queue.submit(dispatch(), SubmitOptions::default()).await.unwrap();
        let envelope = queue.pop().await.unwrap();
        let id = envelope.id;
        queue.redeliver(envelope).await;
        queue.ack().await;

        let again = queue.pop().await.unwrap();
        assert_eq!(again.id, id);
        assert_eq!(again.delivery, 2);
    }
}
