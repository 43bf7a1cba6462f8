//! Proposal Store seam.
//!
//! Every component reaches persisted governance state through this trait,
//! so the SQLite store can be swapped for a test double or another backend.
//! Implementations must enforce UNIQUE(dao_id, user_id) on memberships and
//! UNIQUE(proposal_id, member_id) on votes at the storage layer.

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{
    Dao, DaoId, DaoMember, MemberId, NewDao, NewMember, NewProposal, NewVote, Proposal,
    ProposalId, ProposalQuery, ProposalStatus, QueuedExecution, Vote,
};

/// Outcome of an atomic vote write
#[derive(Debug, Clone)]
pub struct RecordedVote {
    pub vote: Vote,
    /// Proposal after the tally increment (and auto-close, if any)
    pub proposal: Proposal,
    /// Status the proposal was closed with, when the decision rule fired
    pub closed_as: Option<ProposalStatus>,
}

/// Decision rule evaluated on the post-increment proposal inside the vote transaction
pub type CloseDecision<'a> = &'a dyn Fn(&Proposal) -> Option<ProposalStatus>;

pub trait ProposalStore: Send + Sync {
    fn create_dao(&self, dao: &NewDao, now: DateTime<Utc>) -> Result<Dao, StoreError>;

    fn get_dao(&self, dao_id: DaoId) -> Result<Option<Dao>, StoreError>;

    /// Fails with `StoreError::Duplicate` when the user already belongs to the DAO
    fn add_member(&self, member: &NewMember, now: DateTime<Utc>) -> Result<DaoMember, StoreError>;

    fn find_member(&self, dao_id: DaoId, user_id: &str) -> Result<Option<DaoMember>, StoreError>;

    /// Inserts the proposal and bumps the proposer's `proposals_created` in one transaction
    fn create_proposal(
        &self,
        proposal: &NewProposal,
        proposer: MemberId,
        now: DateTime<Utc>,
    ) -> Result<Proposal, StoreError>;

    fn get_proposal(&self, proposal_id: ProposalId) -> Result<Option<Proposal>, StoreError>;

    fn list_proposals(&self, query: &ProposalQuery) -> Result<Vec<Proposal>, StoreError>;

    /// Compare-and-set status change. Returns `None` when the current status
    /// is not one of `from` (or the proposal is gone).
    fn transition_status(
        &self,
        proposal_id: ProposalId,
        from: &[ProposalStatus],
        to: ProposalStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Proposal>, StoreError>;

    /// Hard delete, refused by the store (`StoreError::Stale`) if votes
    /// exist or the proposal was executed. Returns false if nothing matched.
    fn delete_proposal(&self, proposal_id: ProposalId) -> Result<bool, StoreError>;

    fn count_votes(&self, proposal_id: ProposalId) -> Result<u64, StoreError>;

    fn find_vote(
        &self,
        proposal_id: ProposalId,
        member_id: MemberId,
    ) -> Result<Option<Vote>, StoreError>;

    fn list_votes(&self, proposal_id: ProposalId) -> Result<Vec<Vote>, StoreError>;

    /// Persist a ballot, increment the matching tally and `total_votes` by the
    /// ballot's power, apply `decide` to the post-increment proposal and bump
    /// the member's participation counters, all in one transaction.
    ///
    /// Fails with `Duplicate("vote")` when the member already voted and with
    /// `Stale("proposal")` when the proposal stopped accepting votes.
    fn record_vote(
        &self,
        vote: &NewVote,
        decide: CloseDecision<'_>,
    ) -> Result<RecordedVote, StoreError>;

    /// Reserve an execution slot. Idempotent: an existing queued or
    /// executed slot is returned unchanged with `false`. A FAILED or
    /// CANCELLED slot is re-armed with the new deadline and returns `true`.
    fn enqueue_execution(
        &self,
        proposal_id: ProposalId,
        queued_at: DateTime<Utc>,
        execute_after: DateTime<Utc>,
    ) -> Result<(QueuedExecution, bool), StoreError>;

    fn get_execution(&self, proposal_id: ProposalId)
        -> Result<Option<QueuedExecution>, StoreError>;

    /// Queued slots whose timelock has elapsed at `now`
    fn due_executions(&self, now: DateTime<Utc>) -> Result<Vec<QueuedExecution>, StoreError>;

    /// Move a PASSED proposal to EXECUTED and close its slot. Returns false
    /// when the proposal is no longer PASSED or the slot is not queued.
    fn complete_execution(
        &self,
        proposal_id: ProposalId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    fn fail_execution(
        &self,
        proposal_id: ProposalId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Abort a still-queued slot
    fn cancel_execution(&self, proposal_id: ProposalId) -> Result<bool, StoreError>;
}
