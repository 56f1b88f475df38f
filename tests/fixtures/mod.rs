// Shared setup for pipeline integration tests: seeds an in-memory election
// with polls, voters and trustees on top of a LocalPipeline.
#![allow(dead_code)]

use ballot_pipeline::config::PipelineConfig;
use ballot_pipeline::local::LocalPipeline;
use ballot_pipeline::model::{Election, Poll, Stage, Trustee, Voter};
use ballot_pipeline::pipeline::{PartialDecryption, SimulatedProcessor};
use ballot_pipeline::store::EntityStore;

pub struct Seeded {
    pub pipeline: LocalPipeline,
    pub election: Election,
    pub polls: Vec<Poll>,
    pub voters: Vec<Voter>,
    pub local_trustees: Vec<Trustee>,
    pub external_trustees: Vec<Trustee>,
}

/// Shape of the election to seed.
#[derive(Debug, Clone)]
pub struct ElectionShape {
    /// Starting stage of each poll
    pub polls: Vec<Option<Stage>>,
    pub voters_per_poll: usize,
    pub local_trustees: usize,
    pub external_trustees: usize,
}

impl ElectionShape {
    pub fn fresh(polls: usize) -> Self {
        Self {
            polls: vec![None; polls],
            voters_per_poll: 0,
            local_trustees: 1,
            external_trustees: 0,
        }
    }

    pub fn with_voters(mut self, voters_per_poll: usize) -> Self {
        self.voters_per_poll = voters_per_poll;
        self
    }

    pub fn with_external_trustees(mut self, count: usize) -> Self {
        self.external_trustees = count;
        self
    }
}

pub fn test_config(workers: usize) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.queue.workers = workers;
    config.queue.lock_timeout_ms = 2_000;
    config.tasks.voter_email_rate = "1000/s".to_string();
    config
}

pub async fn seed(config: &PipelineConfig, layout: &ElectionShape) -> Seeded {
    seed_with_processor(config, layout, SimulatedProcessor::new()).await
}

pub async fn seed_with_processor(
    config: &PipelineConfig,
    layout: &ElectionShape,
    processor: SimulatedProcessor,
) -> Seeded {
    let pipeline = LocalPipeline::with_processor(config, processor).expect("pipeline builds");
    let election = Election::new("General assembly");
    pipeline.store.insert_election(election.clone()).await;

    let mut polls = Vec::new();
    let mut voters = Vec::new();
    for (index, start) in layout.polls.iter().enumerate() {
        let mut poll = Poll::new(election.id, format!("Question {}", index + 1));
        poll.stage = *start;
        pipeline.store.insert_poll(poll.clone()).await;

        for v in 0..layout.voters_per_poll {
            let voter = Voter::new(
                poll.id,
                format!("Voter{v}"),
                format!("Q{index}"),
                format!("voter{v}.q{index}@example.org"),
            );
            pipeline.store.insert_voter(voter.clone()).await;
            voters.push(voter);
        }
        polls.push(poll);
    }

    let mut local_trustees = Vec::new();
    for t in 0..layout.local_trustees {
        let trustee = Trustee::local(election.id, format!("Server key {t}"));
        pipeline.store.insert_trustee(trustee.clone()).await;
        local_trustees.push(trustee);
    }
    let mut external_trustees = Vec::new();
    for t in 0..layout.external_trustees {
        let trustee = Trustee::new(election.id, format!("Trustee {t}"), format!("trustee{t}@example.org"));
        pipeline.store.insert_trustee(trustee.clone()).await;
        external_trustees.push(trustee);
    }

    Seeded {
        pipeline,
        election,
        polls,
        voters,
        local_trustees,
        external_trustees,
    }
}

impl Seeded {
    pub async fn stages(&self) -> Vec<Option<Stage>> {
        self.pipeline
            .store
            .polls(self.election.id)
            .await
            .expect("polls readable")
            .into_iter()
            .map(|poll| poll.stage)
            .collect()
    }

    pub async fn election_state(&self) -> Election {
        self.pipeline
            .store
            .election(self.election.id)
            .await
            .expect("election readable")
    }
}

pub fn submission(tag: &str) -> PartialDecryption {
    PartialDecryption {
        factors: vec![format!("factor-{tag}")],
        proofs: vec![format!("proof-{tag}")],
    }
}
