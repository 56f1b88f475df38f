use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::model::Mailbox;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub from: String,
    pub to: Mailbox,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("message to {recipient} rejected: {reason}")]
    Rejected { recipient: String, reason: String },
    #[error("mail transport unavailable: {0}")]
    Unavailable(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Unavailable(_))
    }
}

#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError>;
}

/// Transport that keeps every accepted message in memory and logs it.
#[derive(Default)]
pub struct MemoryOutbox {
    sent: Mutex<Vec<OutgoingMessage>>,
    rejecting: Mutex<HashSet<String>>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every future message addressed to `address`.
    pub async fn reject(&self, address: impl Into<String>) {
        self.rejecting.lock().await.insert(address.into());
    }

    pub async fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_to(&self, address: &str) -> Vec<OutgoingMessage> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|m| m.to.address == address)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MailTransport for MemoryOutbox {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        if self.rejecting.lock().await.contains(&message.to.address) {
            return Err(TransportError::Rejected {
                recipient: message.to.address.clone(),
                reason: "mailbox unavailable".to_string(),
            });
        }
        info!(
            to = %message.to,
            subject = %message.subject,
            attachments = message.attachments.len(),
            "mail sent"
        );
        self.sent.lock().await.push(message.clone());
        Ok(())
    }
}
