use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Pipeline activity counters, shared by every component of one pipeline.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub tasks_submitted: AtomicU64,
    pub tasks_succeeded: AtomicU64,
    pub tasks_failed: AtomicU64,
    pub redeliveries: AtomicU64,
    pub stage_transitions: AtomicU64,
    pub duplicate_executions: AtomicU64,
    pub dispatches: AtomicU64,
    pub emails_sent: AtomicU64,
    pub email_failures: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_result(&self, succeeded: bool) {
        if succeeded {
            self.tasks_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_redelivery(&self) {
        self.redeliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stage_transition(&self) {
        self.stage_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_execution(&self) {
        self.duplicate_executions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_email(&self, delivered: bool) {
        if delivered {
            self.emails_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.email_failures.fetch_add(1, Ordering::Relaxed);
            warn!("outgoing email failed");
        }
    }

    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_succeeded: self.tasks_succeeded.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            redeliveries: self.redeliveries.load(Ordering::Relaxed),
            stage_transitions: self.stage_transitions.load(Ordering::Relaxed),
            duplicate_executions: self.duplicate_executions.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            emails_sent: self.emails_sent.load(Ordering::Relaxed),
            email_failures: self.email_failures.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.snapshot();
        info!(
            submitted = stats.tasks_submitted,
            succeeded = stats.tasks_succeeded,
            failed = stats.tasks_failed,
            redelivered = stats.redeliveries,
            transitions = stats.stage_transitions,
            duplicates = stats.duplicate_executions,
            dispatches = stats.dispatches,
            emails_sent = stats.emails_sent,
            email_failures = stats.email_failures,
            "pipeline metrics"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineStats {
    pub tasks_submitted: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub redeliveries: u64,
    pub stage_transitions: u64,
    pub duplicate_executions: u64,
    pub dispatches: u64,
    pub emails_sent: u64,
    pub email_failures: u64,
}

/// Time an operation and log its duration when finished
pub struct OperationTimer {
    operation: &'static str,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    pub fn finish(self) -> u128 {
        let elapsed = self.start.elapsed().as_millis();
        debug!(operation = self.operation, duration_ms = elapsed, "operation completed");
        elapsed
    }
}
