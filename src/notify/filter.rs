// Typed recipient filters, composed explicitly instead of free-form query kwargs

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::model::{Voter, VoterId};

/// A single test against one voter attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum VoterPredicate {
    HasVoted(bool),
    Excluded(bool),
    /// Whether any email has ever been sent to the voter.
    Emailed(bool),
    /// Whether a booth invitation has ever been sent.
    InvitedToBooth(bool),
    /// Case-insensitive match on the part after `@`.
    EmailDomain(String),
    IdIn(BTreeSet<VoterId>),
}

impl VoterPredicate {
    pub fn matches(&self, voter: &Voter) -> bool {
        match self {
            VoterPredicate::HasVoted(expected) => voter.has_voted == *expected,
            VoterPredicate::Excluded(expected) => voter.is_excluded() == *expected,
            VoterPredicate::Emailed(expected) => voter.last_email_sent_at.is_some() == *expected,
            VoterPredicate::InvitedToBooth(expected) => {
                voter.last_booth_invitation_sent_at.is_some() == *expected
            }
            VoterPredicate::EmailDomain(domain) => voter
                .email
                .rsplit_once('@')
                .is_some_and(|(_, host)| host.eq_ignore_ascii_case(domain)),
            VoterPredicate::IdIn(ids) => ids.contains(&voter.id),
        }
    }
}

/// Boolean composition of [`VoterPredicate`]s.
///
/// ```
/// use ballot_pipeline::notify::{VoterFilter, VoterPredicate};
///
/// // Remind everyone who has not voted yet, skipping excluded voters.
/// let filter = VoterFilter::only(VoterPredicate::HasVoted(false))
///     .and_not(VoterFilter::only(VoterPredicate::Excluded(true)));
/// # let _ = filter;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VoterFilter {
    #[default]
    All,
    Only(VoterPredicate),
    Not(Box<VoterFilter>),
    And(Vec<VoterFilter>),
    Or(Vec<VoterFilter>),
}

impl VoterFilter {
    pub fn only(predicate: VoterPredicate) -> Self {
        VoterFilter::Only(predicate)
    }

    /// Builds `include AND NOT exclude`, treating a missing side as no-op.
    pub fn include_exclude(include: Option<VoterFilter>, exclude: Option<VoterFilter>) -> Self {
        let base = include.unwrap_or_default();
        match exclude {
            Some(exclude) => base.and_not(exclude),
            None => base,
        }
    }

    pub fn and(self, other: VoterFilter) -> Self {
        match (self, other) {
            (VoterFilter::All, other) => other,
            (this, VoterFilter::All) => this,
            (VoterFilter::And(mut parts), VoterFilter::And(more)) => {
                parts.extend(more);
                VoterFilter::And(parts)
            }
            (VoterFilter::And(mut parts), other) => {
                parts.push(other);
                VoterFilter::And(parts)
            }
            (this, other) => VoterFilter::And(vec![this, other]),
        }
    }

    pub fn and_not(self, other: VoterFilter) -> Self {
        self.and(other.negate())
    }

    pub fn or(self, other: VoterFilter) -> Self {
        match (self, other) {
            (VoterFilter::Or(mut parts), other) => {
                parts.push(other);
                VoterFilter::Or(parts)
            }
            (this, other) => VoterFilter::Or(vec![this, other]),
        }
    }

    pub fn negate(self) -> Self {
        match self {
            VoterFilter::Not(inner) => *inner,
            other => VoterFilter::Not(Box::new(other)),
        }
    }

    pub fn matches(&self, voter: &Voter) -> bool {
        match self {
            VoterFilter::All => true,
            VoterFilter::Only(predicate) => predicate.matches(voter),
            VoterFilter::Not(inner) => !inner.matches(voter),
            VoterFilter::And(parts) => parts.iter().all(|part| part.matches(voter)),
            VoterFilter::Or(parts) => parts.iter().any(|part| part.matches(voter)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PollId;
    use chrono::Utc;

    fn voter(email: &str, voted: bool) -> Voter {
        let mut voter = Voter::new(PollId::new(), "Test", "Voter", email);
        voter.has_voted = voted;
        voter
    }

    #[test]
    fn include_and_exclude_compose() {
        let mut excluded = voter("c@example.org", false);
        excluded.excluded_at = Some(Utc::now());
        let pending = voter("a@example.org", false);
        let done = voter("b@example.org", true);

        let filter = VoterFilter::include_exclude(
            Some(VoterFilter::only(VoterPredicate::HasVoted(false))),
            Some(VoterFilter::only(VoterPredicate::Excluded(true))),
        );

        assert!(filter.matches(&pending));
        assert!(!filter.matches(&done));
        assert!(!filter.matches(&excluded));
    }

    #[test]
    fn empty_filter_matches_everyone() {
        let filter = VoterFilter::include_exclude(None, None);
        assert_eq!(filter, VoterFilter::All);
        assert!(filter.matches(&voter("x@y.z", true)));
    }

    #[test]
    fn double_negation_collapses() {
        let inner = VoterFilter::only(VoterPredicate::HasVoted(true));
        assert_eq!(inner.clone().negate().negate(), inner);
    }

    #[test]
    fn domain_and_id_predicates() {
        let a = voter("a@Example.org", false);
        let b = voter("b@other.net", false);
        let by_domain = VoterFilter::only(VoterPredicate::EmailDomain("example.org".into()));
        assert!(by_domain.matches(&a));
        assert!(!by_domain.matches(&b));

        let by_id = VoterFilter::only(VoterPredicate::IdIn([b.id].into_iter().collect()));
        assert!(by_id.or(by_domain).matches(&a));
    }

    #[test]
    fn filters_survive_task_serialization() {
        let filter = VoterFilter::only(VoterPredicate::Emailed(false))
            .and_not(VoterFilter::only(VoterPredicate::InvitedToBooth(true)));
        let json = serde_json::to_string(&filter).unwrap();
        let back: VoterFilter = serde_json::from_str(&json).unwrap();
        assert_eq!(back, filter);
    }
}
