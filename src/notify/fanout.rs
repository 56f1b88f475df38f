use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::template::{
    TemplateRenderer, TemplateVars, CAST_VOTE_BODY, CAST_VOTE_SUBJECT, TRUSTEE_BODY,
    TRUSTEE_SUBJECT,
};
use super::transport::{Attachment, MailTransport, OutgoingMessage};
use super::{NotifyError, VoterFilter};
use crate::config::NotificationConfig;
use crate::model::{Election, ElectionId, Mailbox, Poll, PollId, Trustee, TrusteeId, Voter, VoterId};
use crate::observability::PipelineMetrics;
use crate::queue::{Task, TaskSubmitter};
use crate::store::EntityStore;

/// Which voter audit timestamps to stamp after a successful send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditUpdate {
    pub last_email: bool,
    pub booth_invitation: bool,
}

impl Default for AuditUpdate {
    fn default() -> Self {
        Self {
            last_email: true,
            booth_invitation: false,
        }
    }
}

impl AuditUpdate {
    pub fn none() -> Self {
        Self {
            last_email: false,
            booth_invitation: false,
        }
    }

    pub fn booth_invitation() -> Self {
        Self {
            last_email: true,
            booth_invitation: true,
        }
    }
}

/// Request to mail every voter of a poll matching `filter`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotersEmail {
    pub poll_id: PollId,
    pub subject_template: String,
    pub body_template: String,
    #[serde(default)]
    pub vars: TemplateVars,
    #[serde(default)]
    pub filter: VoterFilter,
    #[serde(default)]
    pub audit: AuditUpdate,
}

/// One rendered message to one voter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleVoterEmail {
    pub voter_id: VoterId,
    pub subject_template: String,
    pub body_template: String,
    #[serde(default)]
    pub vars: TemplateVars,
    #[serde(default)]
    pub audit: AuditUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanOutReport {
    pub recipients: usize,
    pub enqueued: usize,
}

/// Combined result of the per-recipient tasks of one fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// No recipient task ran.
    Nothing,
    Complete { succeeded: u64 },
    Partial { succeeded: u64, failed: u64 },
    Failed { failed: u64 },
}

impl DeliveryOutcome {
    pub fn from_counts(succeeded: u64, failed: u64) -> Self {
        match (succeeded, failed) {
            (0, 0) => DeliveryOutcome::Nothing,
            (succeeded, 0) => DeliveryOutcome::Complete { succeeded },
            (0, failed) => DeliveryOutcome::Failed { failed },
            (succeeded, failed) => DeliveryOutcome::Partial { succeeded, failed },
        }
    }
}

/// Builds and sends voter and trustee mail.
#[derive(Clone)]
pub struct Notifier {
    store: Arc<dyn EntityStore>,
    submitter: TaskSubmitter,
    renderer: Arc<dyn TemplateRenderer>,
    transport: Arc<dyn MailTransport>,
    settings: NotificationConfig,
    metrics: Arc<PipelineMetrics>,
}

impl Notifier {
    pub fn new(
        store: Arc<dyn EntityStore>,
        submitter: TaskSubmitter,
        renderer: Arc<dyn TemplateRenderer>,
        transport: Arc<dyn MailTransport>,
        settings: NotificationConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            store,
            submitter,
            renderer,
            transport,
            settings,
            metrics,
        }
    }

    /// Enqueue one `single_voter_email` per matching voter.
    pub async fn voters_email(&self, request: &VotersEmail) -> Result<FanOutReport, NotifyError> {
        let poll = self.store.poll(request.poll_id).await?;
        let voters = self.store.voters(poll.id, &request.filter).await?;

        let mut enqueued = 0;
        for voter in &voters {
            self.submitter
                .submit(Task::SingleVoterEmail(SingleVoterEmail {
                    voter_id: voter.id,
                    subject_template: request.subject_template.clone(),
                    body_template: request.body_template.clone(),
                    vars: request.vars.clone(),
                    audit: request.audit,
                }))
                .await?;
            enqueued += 1;
        }

        info!(poll_id = %poll.id, recipients = voters.len(), "voter mail fanned out");
        Ok(FanOutReport {
            recipients: voters.len(),
            enqueued,
        })
    }

    /// Render and send one voter message, then stamp the requested audit
    /// fields. The voter row stays locked across the send so concurrent
    /// deliveries to the same voter serialize.
    pub async fn single_voter_email(&self, request: &SingleVoterEmail) -> Result<(), NotifyError> {
        let mut voter = self.store.lock_voter(request.voter_id).await?;
        let poll = self.store.poll(voter.poll_id).await?;
        let election = self.store.election(poll.election_id).await?;

        let mut vars = request.vars.clone();
        vars.extend(context(&election, Some(&poll)));
        vars.insert("voter".into(), voter_vars(&voter));

        let subject = self.renderer.render(&request.subject_template, &vars).await?;
        let body = self.renderer.render(&request.body_template, &vars).await?;
        self.deliver(Mailbox::from(&*voter), subject, body, Vec::new())
            .await?;

        let now = Utc::now();
        if request.audit.last_email {
            voter.last_email_sent_at = Some(now);
        }
        if request.audit.booth_invitation {
            voter.last_booth_invitation_sent_at = Some(now);
        }
        self.store.save_voter(voter).await?;
        Ok(())
    }

    /// Enqueue a `trustee_email` for every trustee that decrypts off-server.
    pub async fn notify_trustees(&self, election_id: ElectionId) -> Result<FanOutReport, NotifyError> {
        let trustees = self.store.trustees(election_id).await?;
        let remote: Vec<&Trustee> = trustees.iter().filter(|t| !t.is_local).collect();

        for trustee in &remote {
            self.submitter
                .submit(Task::TrusteeEmail {
                    trustee_id: trustee.id,
                })
                .await?;
        }

        info!(election_id = %election_id, trustees = remote.len(), "trustees notified");
        Ok(FanOutReport {
            recipients: remote.len(),
            enqueued: remote.len(),
        })
    }

    pub async fn trustee_email(&self, trustee_id: TrusteeId) -> Result<(), NotifyError> {
        let mut trustee = self.store.lock_trustee(trustee_id).await?;
        let election = self.store.election(trustee.election_id).await?;

        let mut vars = context(&election, None);
        vars.insert(
            "trustee".into(),
            json!({ "id": trustee.id, "name": trustee.name, "email": trustee.email }),
        );
        vars.insert("url".into(), Value::String(self.trustee_login_url(&election, &trustee)));

        let subject = self.renderer.render(TRUSTEE_SUBJECT, &vars).await?;
        let body = self.renderer.render(TRUSTEE_BODY, &vars).await?;
        self.deliver(Mailbox::from(&*trustee), subject, body, Vec::new())
            .await?;

        trustee.last_notified_at = Some(Utc::now());
        self.store.save_trustee(trustee).await?;
        Ok(())
    }

    /// Receipt for a cast ballot with the vote signature attached.
    pub async fn send_cast_vote_email(
        &self,
        poll_id: PollId,
        voter_id: VoterId,
        signature: &str,
    ) -> Result<(), NotifyError> {
        let voter = self.store.voter(voter_id).await?;
        if voter.poll_id != poll_id {
            return Err(NotifyError::ForeignVoter { voter_id, poll_id });
        }
        let poll = self.store.poll(poll_id).await?;
        let election = self.store.election(poll.election_id).await?;

        let mut vars = context(&election, Some(&poll));
        vars.insert("voter".into(), voter_vars(&voter));
        let subject = self.renderer.render(CAST_VOTE_SUBJECT, &vars).await?;
        let body = self.renderer.render(CAST_VOTE_BODY, &vars).await?;

        let attachment = Attachment {
            filename: "vote.signature".to_string(),
            content: signature.to_string(),
            mime_type: "text/plain".to_string(),
        };
        self.deliver(Mailbox::from(&voter), subject, body, vec![attachment])
            .await
    }

    pub fn trustee_login_url(&self, election: &Election, trustee: &Trustee) -> String {
        format!(
            "{}/elections/{}/trustee/{}/login",
            self.settings.base_url.trim_end_matches('/'),
            election.id,
            trustee.id
        )
    }

    async fn deliver(
        &self,
        to: Mailbox,
        subject: String,
        body: String,
        attachments: Vec<Attachment>,
    ) -> Result<(), NotifyError> {
        let message = OutgoingMessage {
            from: self.settings.from_address.clone(),
            to,
            subject,
            body,
            attachments,
        };
        match self.transport.send(&message).await {
            Ok(()) => {
                debug!(to = %message.to, "message delivered");
                self.metrics.record_email(true);
                Ok(())
            }
            Err(e) => {
                warn!(to = %message.to, error = %e, "message not delivered");
                self.metrics.record_email(false);
                Err(e.into())
            }
        }
    }
}

fn context(election: &Election, poll: Option<&Poll>) -> TemplateVars {
    let mut vars = TemplateVars::new();
    vars.insert(
        "election".into(),
        json!({ "id": election.id, "name": election.name }),
    );
    if let Some(poll) = poll {
        vars.insert("poll".into(), json!({ "id": poll.id, "name": poll.name }));
    }
    vars
}

fn voter_vars(voter: &Voter) -> Value {
    json!({
        "id": voter.id,
        "name": voter.name,
        "surname": voter.surname,
        "full_name": voter.full_name(),
        "email": voter.email,
    })
}
