// Single-process pipeline assembled from the in-memory components

use anyhow::Result;
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::model::{ElectionId, Stage};
use crate::notify::{MemoryOutbox, PlaceholderRenderer};
use crate::observability::PipelineMetrics;
use crate::pipeline::{Collaborators, SimulatedProcessor, TaskRunner};
use crate::queue::{MemoryQueue, QueueError, RunSummary, Task, WorkerPool};
use crate::store::MemoryStore;

/// Store, queue, outbox and worker pool living in this process.
pub struct LocalPipeline {
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryQueue>,
    pub outbox: Arc<MemoryOutbox>,
    pub processor: Arc<SimulatedProcessor>,
    pub runner: Arc<TaskRunner>,
    pub pool: WorkerPool,
    pub metrics: Arc<PipelineMetrics>,
}

impl LocalPipeline {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        Self::with_processor(config, SimulatedProcessor::new())
    }

    pub fn with_processor(config: &PipelineConfig, processor: SimulatedProcessor) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(PipelineMetrics::new());
        let store = Arc::new(MemoryStore::new(config.lock_timeout()));
        let queue = Arc::new(MemoryQueue::new());
        let outbox = Arc::new(MemoryOutbox::new());
        let processor = Arc::new(processor);

        let runner = Arc::new(TaskRunner::new(
            Collaborators {
                store: store.clone(),
                queue: queue.clone(),
                processor: processor.clone(),
                renderer: Arc::new(PlaceholderRenderer::new()?),
                transport: outbox.clone(),
            },
            config,
            metrics.clone(),
        )?);
        let pool = WorkerPool::new(queue.clone(), runner.clone(), &config.queue, metrics.clone());

        Ok(Self {
            store,
            queue,
            outbox,
            processor,
            runner,
            pool,
            metrics,
        })
    }

    pub async fn submit(&self, task: Task) -> Result<(), QueueError> {
        self.runner.submitter().submit(task).await
    }

    /// Start the pipeline for an election by dispatching its first stage.
    pub async fn start(&self, election_id: ElectionId) -> Result<(), QueueError> {
        self.submit(Task::DispatchStage {
            election_id,
            stage: Stage::first(),
            redispatch: false,
        })
        .await
    }

    pub async fn run_until_idle(&self) -> RunSummary {
        self.pool.run_until_idle().await
    }
}
