// Domain records moved through the stage pipeline

pub mod election;
pub mod ids;
pub mod poll;
pub mod recipient;
pub mod stage;

pub use election::Election;
pub use ids::{ElectionId, PollId, TrusteeId, VoterId};
pub use poll::{Poll, TransitionError};
pub use recipient::{Mailbox, Trustee, Voter};
pub use stage::{Stage, UnknownStage};
