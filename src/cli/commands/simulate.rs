use anyhow::{bail, Result};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::config::PipelineConfig;
use crate::local::LocalPipeline;
use crate::model::{Election, Poll, Stage, Trustee, TrusteeId, Voter};
use crate::notify::{AuditUpdate, DeliveryOutcome, TemplateVars, VoterFilter, VoterPredicate, VotersEmail};
use crate::observability::PipelineStats;
use crate::pipeline::PartialDecryption;
use crate::queue::{RunSummary, Task};
use crate::shutdown::ShutdownCoordinator;
use crate::store::EntityStore;

const REMINDER_SUBJECT: &str = "{{ election.name }}: please vote in {{ poll.name }}";
const REMINDER_BODY: &str = "Hello {{ voter.full_name }},

Voting for {{ poll.name }} is open. {{ closing_note }}
";

pub struct SimulateCommand {
    pub polls: usize,
    pub voters: usize,
    pub local_trustees: usize,
    pub trustees: usize,
    pub fail_poll: Option<usize>,
    pub fail_stage: Stage,
    pub notify: bool,
}

impl Default for SimulateCommand {
    fn default() -> Self {
        Self {
            polls: 3,
            voters: 4,
            local_trustees: 1,
            trustees: 1,
            fail_poll: None,
            fail_stage: Stage::Mixed,
            notify: false,
        }
    }
}

/// Final state of a simulated election.
#[derive(Debug)]
pub struct SimulationReport {
    pub election: Election,
    pub polls: Vec<Poll>,
    pub summary: RunSummary,
    pub stats: PipelineStats,
    pub mail_sent: usize,
    pub reminders: DeliveryOutcome,
    pub receipts: DeliveryOutcome,
}

impl SimulateCommand {
    pub async fn execute(&self, config: &PipelineConfig) -> Result<()> {
        let shutdown = Arc::new(ShutdownCoordinator::default());
        let listener = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.trigger_on_ctrl_c().await })
        };

        let report = self.run(config, &shutdown).await;
        listener.abort();
        print!("{}", report?.render());
        Ok(())
    }

    /// Seed the store, then alternate between draining the queue and
    /// feeding it the input an operator or trustee would provide.
    pub async fn run(&self, config: &PipelineConfig, shutdown: &ShutdownCoordinator) -> Result<SimulationReport> {
        let pipeline = LocalPipeline::new(config)?;
        let (election, polls, external) = self.seed(&pipeline).await?;

        if let Some(index) = self.fail_poll {
            let Some(poll) = polls.get(index) else {
                bail!("--fail-poll {index} is out of range for {} polls", polls.len());
            };
            pipeline.processor.fail_on(poll.id, self.fail_stage).await;
            info!(poll = %poll.name, stage = %self.fail_stage, "failure injected");
        }

        pipeline.start(election.id).await?;
        let mut summary = pipeline.pool.run(shutdown.subscribe(), true).await;

        if !external.is_empty() && !shutdown.is_triggered() {
            let mut submitted = 0;
            for poll in pipeline.store.polls(election.id).await? {
                if !poll.is_eligible_for(Stage::PartiallyDecrypted) {
                    continue;
                }
                for trustee_id in &external {
                    pipeline
                        .submit(Task::AddTrusteeFactors {
                            poll_id: poll.id,
                            trustee_id: *trustee_id,
                            submission: PartialDecryption {
                                factors: vec![format!("factor:{}:{}", poll.id, trustee_id)],
                                proofs: vec![format!("proof:{}:{}", poll.id, trustee_id)],
                            },
                        })
                        .await?;
                    submitted += 1;
                }
            }
            info!(submitted, "external trustee factors submitted");
            summary.merge(pipeline.pool.run(shutdown.subscribe(), true).await);
        }

        if self.notify && !shutdown.is_triggered() {
            self.submit_voter_mail(&pipeline, &polls).await?;
            summary.merge(pipeline.pool.run(shutdown.subscribe(), true).await);
        }

        Ok(SimulationReport {
            election: pipeline.store.election(election.id).await?,
            polls: pipeline.store.polls(election.id).await?,
            reminders: summary.delivery_outcome("single_voter_email"),
            receipts: summary.delivery_outcome("send_cast_vote_email"),
            summary,
            stats: pipeline.metrics.snapshot(),
            mail_sent: pipeline.outbox.sent().await.len(),
        })
    }

    async fn seed(&self, pipeline: &LocalPipeline) -> Result<(Election, Vec<Poll>, Vec<TrusteeId>)> {
        let election = Election::new("Simulated election");
        pipeline.store.insert_election(election.clone()).await;

        let mut polls = Vec::with_capacity(self.polls);
        for p in 1..=self.polls {
            let poll = Poll::new(election.id, format!("Poll {p}"));
            pipeline.store.insert_poll(poll.clone()).await;
            for v in 1..=self.voters {
                let mut voter = Voter::new(
                    poll.id,
                    format!("Voter{v}"),
                    format!("Poll{p}"),
                    format!("voter{v}.poll{p}@example.org"),
                );
                voter.has_voted = v % 2 == 1;
                pipeline.store.insert_voter(voter).await;
            }
            polls.push(poll);
        }

        for t in 1..=self.local_trustees {
            let trustee = Trustee::local(election.id, format!("Server trustee {t}"));
            pipeline.store.insert_trustee(trustee).await;
        }
        let mut external = Vec::with_capacity(self.trustees);
        for t in 1..=self.trustees {
            let trustee = Trustee::new(
                election.id,
                format!("Trustee {t}"),
                format!("trustee{t}@example.org"),
            );
            external.push(trustee.id);
            pipeline.store.insert_trustee(trustee).await;
        }

        info!(
            election_id = %election.id,
            polls = self.polls,
            voters = self.polls * self.voters,
            "election seeded"
        );
        Ok((election, polls, external))
    }

    async fn submit_voter_mail(&self, pipeline: &LocalPipeline, polls: &[Poll]) -> Result<()> {
        let mut vars = TemplateVars::new();
        vars.insert("closing_note".into(), json!("It closes soon."));

        for poll in polls {
            pipeline
                .submit(Task::VotersEmail(VotersEmail {
                    poll_id: poll.id,
                    subject_template: REMINDER_SUBJECT.to_string(),
                    body_template: REMINDER_BODY.to_string(),
                    vars: vars.clone(),
                    filter: VoterFilter::only(VoterPredicate::HasVoted(false))
                        .and_not(VoterFilter::only(VoterPredicate::Excluded(true))),
                    audit: AuditUpdate::default(),
                }))
                .await?;

            let voted = pipeline
                .store
                .voters(poll.id, &VoterFilter::only(VoterPredicate::HasVoted(true)))
                .await?;
            for voter in voted {
                pipeline
                    .submit(Task::SendCastVoteEmail {
                        poll_id: poll.id,
                        voter_id: voter.id,
                        signature: format!("signature:{}", voter.id),
                    })
                    .await?;
            }
        }
        Ok(())
    }
}

impl SimulationReport {
    pub fn render(&self) -> String {
        let yes_no = |flag: bool| if flag { "yes" } else { "no" };
        let mut out = String::new();

        out.push_str(&format!("🗳️  ELECTION: {}\n", self.election.name));
        out.push_str(&format!(
            "   frozen: {}  completed: {}\n\n",
            yes_no(self.election.is_frozen()),
            yes_no(self.election.is_completed())
        ));

        out.push_str("📊 POLLS:\n");
        for poll in &self.polls {
            let stage = poll
                .stage
                .map(|stage| format!("{stage:?}"))
                .unwrap_or_else(|| "NotStarted".to_string());
            out.push_str(&format!("   {:<12} {}\n", poll.name, stage));
        }

        out.push_str("\n⚙️  TASKS:\n");
        out.push_str(&format!(
            "   submitted: {}  succeeded: {}  failed: {}  redelivered: {}  duplicates skipped: {}\n",
            self.stats.tasks_submitted,
            self.stats.tasks_succeeded,
            self.stats.tasks_failed,
            self.stats.redeliveries,
            self.stats.duplicate_executions
        ));

        out.push_str(&format!("\n📬 MAIL: {} sent\n", self.mail_sent));
        out.push_str(&format!("   reminders: {:?}\n", self.reminders));
        out.push_str(&format!("   receipts: {:?}\n", self.receipts));

        if !self.summary.failures.is_empty() {
            out.push_str("\n❌ FAILURES:\n");
            for failure in &self.summary.failures {
                let kind = if failure.transient { "transient" } else { "permanent" };
                out.push_str(&format!("   [{}] {}: {}\n", kind, failure.task.name(), failure.error));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.queue.workers = 3;
        config
    }

    #[tokio::test]
    async fn full_run_completes_every_poll() {
        let command = SimulateCommand::default();
        let report = command
            .run(&config(), &ShutdownCoordinator::default())
            .await
            .unwrap();

        assert!(report.election.is_completed());
        assert!(report
            .polls
            .iter()
            .all(|poll| poll.stage == Some(Stage::ResultsComputed)));
        // One mail per external trustee.
        assert_eq!(report.mail_sent, 1);
        assert!(report.summary.failures.is_empty());

        let text = report.render();
        assert!(text.contains("frozen: yes  completed: yes"));
        assert!(text.contains("📬 MAIL: 1 sent"));
        assert!(!text.contains("FAILURES"));
    }

    #[tokio::test]
    async fn out_of_range_failure_index_is_rejected() {
        let command = SimulateCommand {
            fail_poll: Some(9),
            ..SimulateCommand::default()
        };
        assert!(command
            .run(&config(), &ShutdownCoordinator::default())
            .await
            .is_err());
    }
}
