use thiserror::Error;

use crate::model::ProposalStatus;

/// Failures raised by a `ProposalStore` implementation
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A uniqueness constraint rejected the write
    #[error("Duplicate {0}")]
    Duplicate(&'static str),

    /// A guarded update found the row in an unexpected state
    #[error("Stale {0}: row changed concurrently")]
    Stale(&'static str),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Why a proposal does not currently accept votes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VotingClosedReason {
    NotStarted,
    Ended,
    Status(ProposalStatus),
}

impl std::fmt::Display for VotingClosedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VotingClosedReason::NotStarted => f.write_str("voting has not started yet"),
            VotingClosedReason::Ended => f.write_str("voting period has ended"),
            VotingClosedReason::Status(status) => write!(f, "proposal is {}", status),
        }
    }
}

/// Governance workflow failures, one variant per externally visible kind
#[derive(Error, Debug)]
pub enum GovernanceError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    InvalidState(String),

    /// One kind for all three causes; the reason only refines the message
    #[error("Voting is not active for this proposal ({0})")]
    VotingNotActive(VotingClosedReason),

    #[error("Voting period has not concluded")]
    VotingNotConcluded,

    #[error("You have already voted on this proposal")]
    DuplicateVote,

    #[error("Cannot delete a proposal that has votes")]
    HasVotes,

    #[error("Threshold not met: {for_percentage:.2}% for, {threshold}% required")]
    ThresholdNotMet { for_percentage: f64, threshold: u32 },

    #[error("Quorum not reached: {cast} voting power cast, {required} required")]
    QuorumNotReached { cast: u64, required: u64 },

    #[error("Insufficient treasury funds to execute proposal")]
    InsufficientFunds,

    #[error("{0}")]
    Conflict(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(#[from] StoreError),
}

impl GovernanceError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        GovernanceError::Forbidden(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        GovernanceError::InvalidState(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        GovernanceError::Validation(message.into())
    }

    /// Stable machine-readable kind, used in API responses and logs
    pub fn kind(&self) -> &'static str {
        match self {
            GovernanceError::Unauthorized => "Unauthorized",
            GovernanceError::Forbidden(_) => "Forbidden",
            GovernanceError::NotFound(_) => "NotFound",
            GovernanceError::InvalidState(_) => "InvalidState",
            GovernanceError::VotingNotActive(_) => "VotingNotActive",
            GovernanceError::VotingNotConcluded => "VotingNotConcluded",
            GovernanceError::DuplicateVote => "DuplicateVote",
            GovernanceError::HasVotes => "HasVotes",
            GovernanceError::ThresholdNotMet { .. } => "ThresholdNotMet",
            GovernanceError::QuorumNotReached { .. } => "QuorumNotReached",
            GovernanceError::InsufficientFunds => "InsufficientFunds",
            GovernanceError::Conflict(_) => "Conflict",
            GovernanceError::Validation(_) => "Validation",
            GovernanceError::Internal(_) => "InternalError",
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, GovernanceError::Internal(_))
    }
}

pub type Result<T> = std::result::Result<T, GovernanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voting_not_active_messages_name_the_cause() {
        let err = GovernanceError::VotingNotActive(VotingClosedReason::NotStarted);
        assert!(err.to_string().contains("not started"));

        let err = GovernanceError::VotingNotActive(VotingClosedReason::Ended);
        assert!(err.to_string().contains("ended"));

        let err = GovernanceError::VotingNotActive(VotingClosedReason::Status(ProposalStatus::Passed));
        assert!(err.to_string().contains("PASSED"));
        assert_eq!(err.kind(), "VotingNotActive");
    }

    #[test]
    fn test_quorum_error_message() {
        let err = GovernanceError::QuorumNotReached { cast: 40, required: 100 };
        assert!(err.to_string().contains("Quorum not reached"));
        assert!(err.to_string().contains("40"));
    }

    #[test]
    fn test_threshold_error_message() {
        let err = GovernanceError::ThresholdNotMet {
            for_percentage: 55.0,
            threshold: 60,
        };
        assert!(err.to_string().contains("Threshold not met"));
        assert!(err.to_string().contains("60%"));
    }

    #[test]
    fn test_store_error_is_internal() {
        let err: GovernanceError = StoreError::Corrupt("bad status".to_string()).into();
        assert!(err.is_internal());
        assert_eq!(err.kind(), "InternalError");
    }

    #[test]
    fn test_insufficient_funds_message() {
        assert_eq!(
            GovernanceError::InsufficientFunds.to_string(),
            "Insufficient treasury funds to execute proposal"
        );
    }
}
