use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Processing stages every poll and election moves through, in order.
///
/// The derived `Ord` follows declaration order, so `a < b` means `a` comes
/// earlier in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    CreateValidated,
    VotingValidated,
    Mixed,
    MixValidated,
    PartiallyDecrypted,
    Decrypted,
    ResultsComputed,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown stage: {0}")]
pub struct UnknownStage(pub String);

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::CreateValidated,
        Stage::VotingValidated,
        Stage::Mixed,
        Stage::MixValidated,
        Stage::PartiallyDecrypted,
        Stage::Decrypted,
        Stage::ResultsComputed,
    ];

    pub fn first() -> Self {
        Stage::CreateValidated
    }

    pub fn is_terminal(self) -> bool {
        self == Stage::ResultsComputed
    }

    /// Stage a poll must have reached before it may be processed for `self`.
    pub fn previous(self) -> Option<Stage> {
        let index = self.index();
        index.checked_sub(1).map(|i| Self::ALL[i])
    }

    pub fn next(self) -> Option<Stage> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// Name of the processing step that produces this stage.
    pub fn step_name(self) -> &'static str {
        match self {
            Stage::CreateValidated => "validate_create",
            Stage::VotingValidated => "validate_voting",
            Stage::Mixed => "mix",
            Stage::MixValidated => "validate_mixing",
            Stage::PartiallyDecrypted => "partial_decrypt",
            Stage::Decrypted => "decrypt",
            Stage::ResultsComputed => "compute_results",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.step_name())
    }
}

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|stage| {
                stage.step_name() == wanted
                    || serde_json::to_value(stage)
                        .ok()
                        .and_then(|v| v.as_str().map(|name| name == wanted))
                        .unwrap_or(false)
            })
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}
