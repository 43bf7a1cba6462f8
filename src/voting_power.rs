//! Voting Weight Resolver: member voting power and the execution-time
//! quorum/threshold evaluation.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{GovernanceError, Result};
use crate::model::{DaoId, DaoMember, Proposal, ProposalId, Tally, Vote};
use crate::store::ProposalStore;

/// Voting power a member brings to a ballot. Unset or zero counts as 1.
pub fn resolve_voting_power(member: &DaoMember) -> u64 {
    member.voting_power.filter(|power| *power > 0).unwrap_or(1)
}

/// Result of the authoritative pass/fail evaluation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdCheck {
    pub passed: bool,
    pub quorum_reached: bool,
    pub for_percentage: f64,
    pub total_votes: u64,
    pub quorum: u64,
    pub threshold: u32,
}

impl ThresholdCheck {
    /// Evaluate `tally` against the proposal's own quorum and threshold.
    ///
    /// This is the strict rule applied at execution time. It is NOT the
    /// fixed-majority auto-close rule in `vote_recorder`; the two can disagree
    /// (a proposal auto-closed as PASSED at 55% fails a 60% threshold here).
    pub fn evaluate(proposal: &Proposal, tally: &Tally) -> Self {
        let for_percentage = tally.for_percentage();
        let quorum_reached = tally.total_votes >= proposal.quorum;
        let passed = quorum_reached && for_percentage >= f64::from(proposal.threshold);

        Self {
            passed,
            quorum_reached,
            for_percentage,
            total_votes: tally.total_votes,
            quorum: proposal.quorum,
            threshold: proposal.threshold,
        }
    }

    /// The failure this check represents, if it did not pass
    pub fn failure(&self) -> Option<GovernanceError> {
        if self.passed {
            None
        } else if !self.quorum_reached {
            Some(GovernanceError::QuorumNotReached {
                cast: self.total_votes,
                required: self.quorum,
            })
        } else {
            Some(GovernanceError::ThresholdNotMet {
                for_percentage: self.for_percentage,
                threshold: self.threshold,
            })
        }
    }
}

/// Rebuild a tally from the cast ballots
pub fn recount(votes: &[Vote]) -> Tally {
    votes
        .iter()
        .fold(Tally::default(), |tally, vote| tally.with_vote(vote.vote_type, vote.voting_power))
}

pub struct VotingPowerResolver {
    store: Arc<dyn ProposalStore>,
}

impl VotingPowerResolver {
    pub fn new(store: Arc<dyn ProposalStore>) -> Self {
        Self { store }
    }

    /// Current voting power of `user_id` in a DAO, `None` for non-members
    pub fn current_voting_power(&self, dao_id: DaoId, user_id: &str) -> Result<Option<u64>> {
        Ok(self
            .store
            .find_member(dao_id, user_id)?
            .as_ref()
            .map(resolve_voting_power))
    }

    /// Evaluate quorum and threshold from the cast ballots of a proposal
    pub fn check_proposal_threshold(&self, proposal_id: ProposalId) -> Result<ThresholdCheck> {
        let proposal = self
            .store
            .get_proposal(proposal_id)?
            .ok_or(GovernanceError::NotFound("Proposal"))?;
        self.check_loaded(&proposal)
    }

    pub(crate) fn check_loaded(&self, proposal: &Proposal) -> Result<ThresholdCheck> {
        let votes = self.store.list_votes(proposal.id)?;
        let tally = recount(&votes);

        if tally != proposal.tally() {
            warn!(
                "Proposal {} stored tally {:?} disagrees with ballots {:?}; using ballots",
                proposal.id,
                proposal.tally(),
                tally
            );
        }

        let check = ThresholdCheck::evaluate(proposal, &tally);
        debug!(
            "Proposal {} threshold check: passed={} quorum_reached={} for={:.2}%",
            proposal.id, check.passed, check.quorum_reached, check.for_percentage
        );
        Ok(check)
    }
}
