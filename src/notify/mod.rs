//! Voter and trustee notifications
//!
//! Bulk mail is a fan-out: one task selects recipients and enqueues a
//! rate-limited task per recipient, so a bad address or a transport hiccup
//! costs one message instead of the whole batch.

pub mod fanout;
pub mod filter;
pub mod template;
pub mod transport;

use thiserror::Error;

use crate::model::{PollId, VoterId};
use crate::queue::QueueError;
use crate::store::StoreError;

pub use fanout::{AuditUpdate, DeliveryOutcome, FanOutReport, Notifier, SingleVoterEmail, VotersEmail};
pub use filter::{VoterFilter, VoterPredicate};
pub use template::{PlaceholderRenderer, RenderError, TemplateRenderer, TemplateVars};
pub use transport::{Attachment, MailTransport, MemoryOutbox, OutgoingMessage, TransportError};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("failed to render message: {0}")]
    Render(#[from] RenderError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("voter {voter_id} is not registered for poll {poll_id}")]
    ForeignVoter { voter_id: VoterId, poll_id: PollId },
}

impl NotifyError {
    pub fn is_transient(&self) -> bool {
        match self {
            NotifyError::Store(e) => e.is_transient(),
            NotifyError::Queue(e) => e.is_transient(),
            NotifyError::Transport(e) => e.is_transient(),
            NotifyError::Render(_) | NotifyError::ForeignVoter { .. } => false,
        }
    }
}
