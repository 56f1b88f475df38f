// Message recipients: voters of a poll and trustees of an election

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ElectionId, PollId, TrusteeId, VoterId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voter {
    pub id: VoterId,
    pub poll_id: PollId,
    pub name: String,
    pub surname: String,
    pub email: String,
    pub has_voted: bool,
    pub excluded_at: Option<DateTime<Utc>>,
    pub last_email_sent_at: Option<DateTime<Utc>>,
    pub last_booth_invitation_sent_at: Option<DateTime<Utc>>,
}

impl Voter {
    pub fn new(
        poll_id: PollId,
        name: impl Into<String>,
        surname: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            id: VoterId::new(),
            poll_id,
            name: name.into(),
            surname: surname.into(),
            email: email.into(),
            has_voted: false,
            excluded_at: None,
            last_email_sent_at: None,
            last_booth_invitation_sent_at: None,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.name, self.surname).trim().to_string()
    }

    pub fn is_excluded(&self) -> bool {
        self.excluded_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trustee {
    pub id: TrusteeId,
    pub election_id: ElectionId,
    pub name: String,
    pub email: String,
    /// The server holds this trustee's secret and decrypts on its behalf.
    pub is_local: bool,
    pub last_notified_at: Option<DateTime<Utc>>,
}

impl Trustee {
    pub fn new(election_id: ElectionId, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: TrusteeId::new(),
            election_id,
            name: name.into(),
            email: email.into(),
            is_local: false,
            last_notified_at: None,
        }
    }

    pub fn local(election_id: ElectionId, name: impl Into<String>) -> Self {
        Self {
            is_local: true,
            ..Self::new(election_id, name, String::new())
        }
    }
}

/// Display name plus address, rendered as `Name <address>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mailbox {
    pub name: String,
    pub address: String,
}

impl Mailbox {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

impl std::fmt::Display for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            write!(f, "<{}>", self.address)
        } else {
            write!(f, "{} <{}>", self.name, self.address)
        }
    }
}

impl From<&Voter> for Mailbox {
    fn from(voter: &Voter) -> Self {
        Mailbox::new(voter.full_name(), voter.email.clone())
    }
}

impl From<&Trustee> for Mailbox {
    fn from(trustee: &Trustee) -> Self {
        Mailbox::new(trustee.name.clone(), trustee.email.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailbox_formats_like_an_address_header() {
        let voter = Voter::new(PollId::new(), "Ada", "Lovelace", "ada@example.org");
        assert_eq!(Mailbox::from(&voter).to_string(), "Ada Lovelace <ada@example.org>");
        assert_eq!(Mailbox::new("", "x@y.z").to_string(), "<x@y.z>");
    }
}
