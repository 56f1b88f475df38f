// Worker pool draining a MemoryQueue

use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};

use super::memory::{Envelope, MemoryQueue};
use super::rate_limit::RateLimiters;
use super::Task;
use crate::config::QueueConfig;
use crate::notify::DeliveryOutcome;
use crate::observability::{OperationTimer, PipelineMetrics};
use crate::pipeline::TaskRunner;
use crate::telemetry::create_task_span;

const IDLE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskTally {
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub task: Task,
    pub error: String,
    pub transient: bool,
}

/// What one pool run processed.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub tallies: BTreeMap<&'static str, TaskTally>,
    pub failures: Vec<TaskFailure>,
    pub redelivered: u64,
}

impl RunSummary {
    pub fn tally(&self, task_name: &str) -> TaskTally {
        self.tallies.get(task_name).copied().unwrap_or_default()
    }

    pub fn total_failed(&self) -> u64 {
        self.tallies.values().map(|t| t.failed).sum()
    }

    /// Aggregate outcome of every delivery of one task name, typically a
    /// per-recipient mail task fanned out by one request.
    pub fn delivery_outcome(&self, task_name: &str) -> DeliveryOutcome {
        let tally = self.tally(task_name);
        DeliveryOutcome::from_counts(tally.succeeded, tally.failed)
    }

    fn record(&mut self, envelope: &Envelope, result: Result<(), (String, bool)>) {
        let tally = self.tallies.entry(envelope.task.name()).or_default();
        match result {
            Ok(()) => tally.succeeded += 1,
            Err((error, transient)) => {
                tally.failed += 1;
                self.failures.push(TaskFailure {
                    task: envelope.task.clone(),
                    error,
                    transient,
                });
            }
        }
    }

    pub fn merge(&mut self, other: RunSummary) {
        for (name, tally) in other.tallies {
            let entry = self.tallies.entry(name).or_default();
            entry.succeeded += tally.succeeded;
            entry.failed += tally.failed;
        }
        self.failures.extend(other.failures);
        self.redelivered += other.redelivered;
    }
}

/// Fixed set of workers pulling from one queue.
///
/// Failed tasks are logged and counted, never retried automatically.
/// With `redelivery_probability > 0` a finished task is put back once more,
/// reproducing at-least-once delivery.
#[derive(Clone)]
pub struct WorkerPool {
    queue: Arc<MemoryQueue>,
    runner: Arc<TaskRunner>,
    limiters: Arc<RateLimiters>,
    metrics: Arc<PipelineMetrics>,
    workers: usize,
    redelivery_probability: f64,
    host: String,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<MemoryQueue>,
        runner: Arc<TaskRunner>,
        config: &QueueConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        Self {
            queue,
            runner,
            limiters: Arc::new(RateLimiters::new()),
            metrics,
            workers: config.workers.max(1),
            redelivery_probability: config.redelivery_probability.clamp(0.0, 1.0),
            host,
        }
    }

    /// Process tasks until the queue is empty and no worker is busy.
    pub async fn run_until_idle(&self) -> RunSummary {
        let (_keep_open, shutdown) = watch::channel(false);
        self.run(shutdown, true).await
    }

    /// Process tasks until `shutdown` flips to true (or its sender goes
    /// away). With `stop_when_idle` workers also exit once the queue drains.
    pub async fn run(&self, shutdown: watch::Receiver<bool>, stop_when_idle: bool) -> RunSummary {
        let summary = Arc::new(Mutex::new(RunSummary::default()));
        let mut set = JoinSet::new();
        for n in 0..self.workers {
            let worker = Worker {
                id: format!("{}-{}", self.host, n),
                pool: self.clone(),
                summary: summary.clone(),
            };
            set.spawn(worker.run(shutdown.clone(), stop_when_idle));
        }
        info!(workers = self.workers, "worker pool started");

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "worker exited abnormally");
            }
        }

        let total = std::mem::take(&mut *summary.lock().await);
        info!(
            failed = total.total_failed(),
            redelivered = total.redelivered,
            "worker pool stopped"
        );
        total
    }
}

struct Worker {
    id: String,
    pool: WorkerPool,
    summary: Arc<Mutex<RunSummary>>,
}

impl Worker {
    async fn run(self, mut shutdown: watch::Receiver<bool>, stop_when_idle: bool) {
        let queue = self.pool.queue.clone();
        loop {
            if *shutdown.borrow() {
                debug!(worker.id = %self.id, "worker stopping on shutdown");
                break;
            }

            let notified = queue.notified();
            match queue.pop().await {
                Some(envelope) => {
                    self.process(envelope).await;
                    queue.ack().await;
                }
                None => {
                    if stop_when_idle && queue.is_idle().await {
                        queue.wake_all();
                        break;
                    }
                    tokio::select! {
                        _ = notified => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(IDLE_POLL) => {}
                    }
                }
            }
        }
    }

    async fn process(&self, envelope: Envelope) {
        let name = envelope.task.name();
        let span = create_task_span(name, &envelope.correlation_id, &self.id, envelope.delivery);
        async {
            if let Some(limit) = envelope.options.rate_limit {
                self.pool.limiters.acquire(name, limit).await;
            }

            let timer = OperationTimer::new(name);
            let result = self.pool.runner.run(&envelope.task).await;
            let elapsed_ms = timer.finish();

            let outcome = match result {
                Ok(report) => {
                    debug!(?report, elapsed_ms, "task finished");
                    self.pool.metrics.record_task_result(true);
                    Ok(())
                }
                Err(e) => {
                    let transient = e.is_transient();
                    if transient {
                        warn!(error = %e, "task failed with a transient error, resubmit to retry");
                    } else {
                        error!(error = %e, "task failed");
                    }
                    self.pool.metrics.record_task_result(false);
                    Err((e.to_string(), transient))
                }
            };

            let redeliver = envelope.delivery == 1
                && self.pool.redelivery_probability > 0.0
                && rand::rng().random_bool(self.pool.redelivery_probability);

            {
                let mut summary = self.summary.lock().await;
                summary.record(&envelope, outcome);
                if redeliver {
                    summary.redelivered += 1;
                }
            }

            if redeliver {
                self.pool.metrics.record_redelivery();
                self.pool.queue.redeliver(envelope).await;
            }
        }
        .instrument(span)
        .await
    }
}
