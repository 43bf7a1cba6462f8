//! Proposal Lifecycle Manager.
//!
//! Status machine:
//!
//! ```text
//! DRAFT -> ACTIVE -> PASSED -> EXECUTED
//!   |        |   \-> FAILED
//!   \--------+-----> CANCELLED
//! ```
//!
//! Votes move ACTIVE to PASSED/FAILED early (see `vote_recorder`); everything
//! else goes through the operations here. EXECUTED is only ever set by the
//! execution queue once the timelock has elapsed.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::GovernanceConfig;
use crate::error::{GovernanceError, Result, StoreError};
use crate::execution_queue::ExecutionQueue;
use crate::model::{
    Dao, DaoId, DaoMember, ExecutionState, MemberRole, NewDao, NewMember, NewProposal, Proposal,
    ProposalId, ProposalQuery, ProposalStatus, Tally, Vote,
};
use crate::store::ProposalStore;
use crate::treasury::Treasury;
use crate::voting_power::{ThresholdCheck, VotingPowerResolver};

const DEFAULT_VOTING_PERIOD_DAYS: u32 = 7;

/// Fields of a new DAO
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDao {
    pub name: String,
    #[serde(default)]
    pub governance_token: Option<String>,
    #[serde(default)]
    pub voting_period_days: Option<u32>,
    #[serde(default)]
    pub quorum_threshold: u64,
    /// Address the creator is enrolled with; defaults to the caller id
    #[serde(default)]
    pub address: Option<String>,
}

/// Fields of a new membership
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMember {
    pub user_id: String,
    pub address: String,
    #[serde(default)]
    pub role: Option<MemberRole>,
    #[serde(default)]
    pub voting_power: Option<u64>,
}

/// Fields of a new proposal
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProposal {
    pub title: String,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub requested_amount: Option<u64>,
    #[serde(default)]
    pub voting_period_days: Option<u32>,
    #[serde(default)]
    pub threshold: Option<u32>,
    #[serde(default)]
    pub discussion: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
    /// Create in DRAFT instead of opening voting immediately
    #[serde(default)]
    pub draft: bool,
}

/// Listing filter and page
#[derive(Debug, Clone, Default)]
pub struct ListProposals {
    pub status: Option<ProposalStatus>,
    pub category: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Vote totals with percentages, as shown next to a proposal
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteSummary {
    pub votes_for: u64,
    pub votes_against: u64,
    pub votes_abstain: u64,
    pub total_votes: u64,
    pub for_percentage: f64,
    pub against_percentage: f64,
    pub abstain_percentage: f64,
    /// Number of ballots, independent of their weight
    pub ballot_count: u64,
}

impl VoteSummary {
    pub fn new(tally: &Tally, ballot_count: u64) -> Self {
        Self {
            votes_for: tally.votes_for,
            votes_against: tally.votes_against,
            votes_abstain: tally.votes_abstain,
            total_votes: tally.total_votes,
            for_percentage: tally.for_percentage(),
            against_percentage: tally.against_percentage(),
            abstain_percentage: tally.abstain_percentage(),
            ballot_count,
        }
    }
}

/// Proposal with its vote summary and, for a known caller, their own ballot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalView {
    #[serde(flatten)]
    pub proposal: Proposal,
    pub vote_summary: VoteSummary,
    pub user_vote: Option<Vote>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalPage {
    pub proposals: Vec<ProposalView>,
    pub page: u32,
    pub limit: u32,
}

/// Confirmation returned by a successful execute request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReceipt {
    pub message: String,
    pub proposal_id: ProposalId,
    pub execute_after: DateTime<Utc>,
}

pub struct ProposalLifecycle {
    store: Arc<dyn ProposalStore>,
    treasury: Arc<dyn Treasury>,
    clock: Arc<dyn Clock>,
    resolver: Arc<VotingPowerResolver>,
    queue: Arc<ExecutionQueue>,
    config: GovernanceConfig,
}

fn require_caller(user_id: &str) -> Result<&str> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(GovernanceError::Unauthorized);
    }
    Ok(user_id)
}

fn non_blank(value: &str, field: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(GovernanceError::validation(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

impl ProposalLifecycle {
    pub fn new(
        store: Arc<dyn ProposalStore>,
        treasury: Arc<dyn Treasury>,
        clock: Arc<dyn Clock>,
        resolver: Arc<VotingPowerResolver>,
        queue: Arc<ExecutionQueue>,
        config: GovernanceConfig,
    ) -> Self {
        Self {
            store,
            treasury,
            clock,
            resolver,
            queue,
            config,
        }
    }

    // ---- administration ----

    /// Create a DAO and enroll the caller as its first ADMIN
    pub fn create_dao(&self, user_id: &str, request: CreateDao) -> Result<(Dao, DaoMember)> {
        let user_id = require_caller(user_id)?;
        let name = non_blank(&request.name, "name")?;
        let voting_period_days = request
            .voting_period_days
            .unwrap_or(DEFAULT_VOTING_PERIOD_DAYS);
        if voting_period_days == 0 {
            return Err(GovernanceError::validation("votingPeriodDays must be at least 1"));
        }

        let now = self.clock.now();
        let dao = self.store.create_dao(
            &NewDao {
                name,
                governance_token: request.governance_token,
                voting_period_days,
                quorum_threshold: request.quorum_threshold,
            },
            now,
        )?;

        let admin = self.store.add_member(
            &NewMember {
                dao_id: dao.id,
                user_id: user_id.to_string(),
                address: request
                    .address
                    .filter(|a| !a.trim().is_empty())
                    .unwrap_or_else(|| user_id.to_string()),
                role: MemberRole::Admin,
                voting_power: None,
            },
            now,
        )?;

        info!("DAO {} '{}' created by {}", dao.id, dao.name, user_id);
        Ok((dao, admin))
    }

    /// Enroll a member. Only DAO admins may do this.
    pub fn add_member(&self, dao_id: DaoId, user_id: &str, request: AddMember) -> Result<DaoMember> {
        let user_id = require_caller(user_id)?;
        self.store
            .get_dao(dao_id)?
            .ok_or(GovernanceError::NotFound("DAO"))?;

        let caller = self.store.find_member(dao_id, user_id)?;
        if !caller.as_ref().map_or(false, DaoMember::is_admin) {
            return Err(GovernanceError::forbidden("Only DAO admins can add members"));
        }

        if let Some(power) = request.voting_power {
            if power > self.config.max_voting_power {
                return Err(GovernanceError::validation(format!(
                    "votingPower cannot exceed {}",
                    self.config.max_voting_power
                )));
            }
        }

        let new_member = NewMember {
            dao_id,
            user_id: non_blank(&request.user_id, "userId")?,
            address: non_blank(&request.address, "address")?,
            role: request.role.unwrap_or(MemberRole::Member),
            voting_power: request.voting_power,
        };

        match self.store.add_member(&new_member, self.clock.now()) {
            Ok(member) => {
                info!(
                    "Member {} joined DAO {} as {} (power {:?})",
                    member.user_id, dao_id, member.role, member.voting_power
                );
                Ok(member)
            }
            Err(StoreError::Duplicate(_)) => Err(GovernanceError::Conflict(
                "User is already a member of this DAO".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    // ---- proposal lifecycle ----

    pub fn create_proposal(
        &self,
        dao_id: DaoId,
        user_id: &str,
        request: CreateProposal,
    ) -> Result<Proposal> {
        let user_id = require_caller(user_id)?;
        let dao = self
            .store
            .get_dao(dao_id)?
            .ok_or(GovernanceError::NotFound("DAO"))?;
        let member = self
            .store
            .find_member(dao_id, user_id)?
            .ok_or_else(|| GovernanceError::forbidden("You must be a DAO member to create proposals"))?;

        let title = non_blank(&request.title, "title")?;
        let description = non_blank(&request.description, "description")?;
        let category = non_blank(&request.category, "category")?.to_uppercase();

        let threshold = request.threshold.unwrap_or(self.config.default_threshold);
        if threshold == 0 || threshold > 100 {
            return Err(GovernanceError::validation("threshold must be between 1 and 100"));
        }

        let voting_period_days = request.voting_period_days.unwrap_or(dao.voting_period_days);
        if voting_period_days == 0 {
            return Err(GovernanceError::validation("votingPeriodDays must be at least 1"));
        }

        let status = if request.draft {
            ProposalStatus::Draft
        } else {
            ProposalStatus::Active
        };

        let now = self.clock.now();
        let proposal = self.store.create_proposal(
            &NewProposal {
                dao_id,
                title,
                description,
                proposer: member.address.clone(),
                category,
                status,
                requested_amount: request.requested_amount,
                quorum: dao.quorum_threshold,
                threshold,
                start_time: now,
                end_time: now + Duration::days(i64::from(voting_period_days)),
                discussion: request.discussion.filter(|d| !d.trim().is_empty()),
                attachments: request.attachments,
            },
            member.id,
            now,
        )?;

        info!(
            "Proposal {} '{}' created in DAO {} by {} ({}, voting until {})",
            proposal.id, proposal.title, dao_id, member.address, proposal.status, proposal.end_time
        );
        Ok(proposal)
    }

    /// DRAFT -> ACTIVE. Start and end times are kept as created.
    pub fn activate_proposal(&self, proposal_id: ProposalId, user_id: &str) -> Result<Proposal> {
        let proposal = self.load(proposal_id)?;
        self.authorize_manager(&proposal, user_id, "activate")?;

        if proposal.status != ProposalStatus::Draft {
            return Err(GovernanceError::invalid_state(format!(
                "Only DRAFT proposals can be activated (proposal is {})",
                proposal.status
            )));
        }

        let activated = self.transition(proposal_id, &[ProposalStatus::Draft], ProposalStatus::Active)?;
        info!("Proposal {} activated by {}", proposal_id, user_id);
        Ok(activated)
    }

    /// Any non-terminal status -> CANCELLED. A queued execution is aborted.
    pub fn cancel_proposal(&self, proposal_id: ProposalId, user_id: &str) -> Result<Proposal> {
        let proposal = self.load(proposal_id)?;
        self.authorize_manager(&proposal, user_id, "cancel")?;

        if proposal.status.is_terminal() {
            return Err(GovernanceError::invalid_state(format!(
                "Cannot cancel a proposal that is {}",
                proposal.status
            )));
        }

        let cancelled = self.transition(
            proposal_id,
            &[
                ProposalStatus::Draft,
                ProposalStatus::Active,
                ProposalStatus::Passed,
                ProposalStatus::Failed,
            ],
            ProposalStatus::Cancelled,
        )?;
        self.queue.abort(proposal_id)?;

        info!("Proposal {} cancelled by {}", proposal_id, user_id);
        Ok(cancelled)
    }

    pub fn delete_proposal(&self, proposal_id: ProposalId, user_id: &str) -> Result<ProposalId> {
        let proposal = self.load(proposal_id)?;
        self.authorize_manager(&proposal, user_id, "delete")?;

        if proposal.status == ProposalStatus::Executed {
            return Err(GovernanceError::invalid_state("Cannot delete an executed proposal"));
        }
        if self.store.count_votes(proposal_id)? > 0 {
            return Err(GovernanceError::HasVotes);
        }

        match self.store.delete_proposal(proposal_id) {
            Ok(true) => {
                info!("Proposal {} deleted by {}", proposal_id, user_id);
                Ok(proposal_id)
            }
            Ok(false) => Err(GovernanceError::NotFound("Proposal")),
            // A vote or the execution worker got there first
            Err(StoreError::Stale(_)) => Err(GovernanceError::Conflict(
                "Proposal changed while it was being deleted".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Validate the outcome and queue the proposal behind the timelock.
    ///
    /// Accepts an ACTIVE proposal whose voting period has ended, or one that
    /// a vote already closed as PASSED. The quorum/threshold check here is
    /// the authoritative one and may fail a proposal the >50% auto-close
    /// rule passed.
    pub fn execute_proposal(
        &self,
        proposal_id: ProposalId,
        user_id: &str,
    ) -> Result<ExecutionReceipt> {
        let user_id = require_caller(user_id)?;
        let proposal = self.load(proposal_id)?;

        let caller = self.store.find_member(proposal.dao_id, user_id)?;
        if !caller.as_ref().map_or(false, DaoMember::is_admin) {
            return Err(GovernanceError::forbidden("Only DAO admins can execute proposals"));
        }

        let now = self.clock.now();
        match proposal.status {
            ProposalStatus::Active if now >= proposal.end_time => {}
            ProposalStatus::Passed => {}
            ProposalStatus::Active | ProposalStatus::Draft => {
                return Err(GovernanceError::VotingNotConcluded)
            }
            status => {
                return Err(GovernanceError::invalid_state(format!(
                    "Cannot execute a proposal that is {}",
                    status
                )))
            }
        }

        let check = self.resolver.check_loaded(&proposal)?;
        if let Some(failure) = check.failure() {
            self.store.transition_status(
                proposal_id,
                &[ProposalStatus::Active, ProposalStatus::Passed],
                ProposalStatus::Failed,
                now,
            )?;
            self.queue.abort(proposal_id)?;
            warn!("Proposal {} failed execution check: {}", proposal_id, failure);
            return Err(failure);
        }

        if let Some(amount) = proposal.requested_funds() {
            if !self.treasury.check_funds_availability(proposal.dao_id, amount)? {
                warn!(
                    "Proposal {} requests {} but DAO {} treasury cannot cover it",
                    proposal_id, amount, proposal.dao_id
                );
                return Err(GovernanceError::InsufficientFunds);
            }
        }

        if proposal.status == ProposalStatus::Active {
            self.transition(proposal_id, &[ProposalStatus::Active], ProposalStatus::Passed)?;
        }

        let slot = self.queue.queue_proposal_execution(proposal_id)?;
        if slot.state != ExecutionState::Queued {
            return Err(GovernanceError::Conflict(format!(
                "Execution of proposal {} is already {}",
                proposal_id,
                slot.state.as_str()
            )));
        }
        info!(
            "Proposal {} approved for execution by {} ({:.2}% for, executes after {})",
            proposal_id, user_id, check.for_percentage, slot.execute_after
        );

        Ok(ExecutionReceipt {
            message: "Proposal queued for execution".to_string(),
            proposal_id,
            execute_after: slot.execute_after,
        })
    }

    // ---- reads ----

    pub fn get_proposal(&self, proposal_id: ProposalId, caller: Option<&str>) -> Result<ProposalView> {
        let proposal = self.load(proposal_id)?;
        self.view(proposal, caller)
    }

    pub fn list_proposals(
        &self,
        dao_id: DaoId,
        filter: ListProposals,
        caller: Option<&str>,
    ) -> Result<ProposalPage> {
        let page = filter.page.unwrap_or(1).max(1);
        let limit = filter
            .limit
            .unwrap_or(self.config.default_page_limit)
            .clamp(1, self.config.max_page_limit);

        let query = ProposalQuery {
            dao_id,
            status: filter.status,
            category: filter
                .category
                .map(|c| c.trim().to_uppercase())
                .filter(|c| !c.is_empty()),
            offset: (page - 1).saturating_mul(limit),
            limit,
        };

        let proposals = self
            .store
            .list_proposals(&query)?
            .into_iter()
            .map(|proposal| self.view(proposal, caller))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "Listed {} proposals of DAO {} (page {}, limit {})",
            proposals.len(),
            dao_id,
            page,
            limit
        );
        Ok(ProposalPage {
            proposals,
            page,
            limit,
        })
    }

    pub fn list_votes(&self, proposal_id: ProposalId) -> Result<Vec<Vote>> {
        self.load(proposal_id)?;
        Ok(self.store.list_votes(proposal_id)?)
    }

    pub fn check_threshold(&self, proposal_id: ProposalId) -> Result<ThresholdCheck> {
        self.resolver.check_proposal_threshold(proposal_id)
    }

    // ---- helpers ----

    fn load(&self, proposal_id: ProposalId) -> Result<Proposal> {
        self.store
            .get_proposal(proposal_id)?
            .ok_or(GovernanceError::NotFound("Proposal"))
    }

    fn view(&self, proposal: Proposal, caller: Option<&str>) -> Result<ProposalView> {
        let ballot_count = self.store.count_votes(proposal.id)?;

        let user_vote = match caller.map(str::trim).filter(|c| !c.is_empty()) {
            Some(user_id) => match self.store.find_member(proposal.dao_id, user_id)? {
                Some(member) => self.store.find_vote(proposal.id, member.id)?,
                None => None,
            },
            None => None,
        };

        Ok(ProposalView {
            vote_summary: VoteSummary::new(&proposal.tally(), ballot_count),
            user_vote,
            proposal,
        })
    }

    /// Admins and the original proposer may manage a proposal
    fn authorize_manager(&self, proposal: &Proposal, user_id: &str, action: &str) -> Result<DaoMember> {
        let user_id = require_caller(user_id)?;
        let member = self.store.find_member(proposal.dao_id, user_id)?;

        match member {
            Some(member) if member.is_admin() || member.address == proposal.proposer => Ok(member),
            _ => Err(GovernanceError::forbidden(format!(
                "Only DAO admins or the proposer can {} this proposal",
                action
            ))),
        }
    }

    fn transition(
        &self,
        proposal_id: ProposalId,
        from: &[ProposalStatus],
        to: ProposalStatus,
    ) -> Result<Proposal> {
        self.store
            .transition_status(proposal_id, from, to, self.clock.now())?
            .ok_or_else(|| {
                GovernanceError::Conflict(format!(
                    "Proposal {} changed state before it could become {}",
                    proposal_id, to
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::{NewVote, VoteType};
    use crate::sqlite_store::SqliteStore;
    use crate::treasury::{MockTreasury, TreasuryLedger};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 14, 10, 0, 0).unwrap()
    }

    struct Harness {
        store: Arc<SqliteStore>,
        clock: Arc<ManualClock>,
        lifecycle: ProposalLifecycle,
        dao_id: DaoId,
    }

    fn harness_with(treasury: Arc<dyn Treasury>, quorum: u64) -> Harness {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(t0()));
        let config = GovernanceConfig::default();

        let resolver = Arc::new(VotingPowerResolver::new(store.clone()));
        let queue = Arc::new(ExecutionQueue::new(
            store.clone(),
            treasury.clone(),
            clock.clone(),
            Duration::hours(config.execution_timelock_hours),
        ));
        let lifecycle = ProposalLifecycle::new(
            store.clone(),
            treasury,
            clock.clone(),
            resolver,
            queue,
            config,
        );

        let (dao, _) = lifecycle
            .create_dao(
                "admin",
                CreateDao {
                    name: "Mesh DAO".to_string(),
                    governance_token: None,
                    voting_period_days: Some(5),
                    quorum_threshold: quorum,
                    address: Some("0xadmin".to_string()),
                },
            )
            .unwrap();

        for (user, power) in [("alice", 25), ("bob", 10)] {
            lifecycle
                .add_member(
                    dao.id,
                    "admin",
                    AddMember {
                        user_id: user.to_string(),
                        address: format!("0x{}", user),
                        role: None,
                        voting_power: Some(power),
                    },
                )
                .unwrap();
        }

        Harness {
            store,
            clock,
            lifecycle,
            dao_id: dao.id,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(TreasuryLedger::new()), 10)
    }

    fn request(title: &str) -> CreateProposal {
        CreateProposal {
            title: title.to_string(),
            description: "Details".to_string(),
            category: "governance".to_string(),
            ..Default::default()
        }
    }

    /// Insert a ballot straight through the store, bypassing auto-close
    fn ballot(h: &Harness, proposal_id: ProposalId, user: &str, vote_type: VoteType) {
        let member = h.store.find_member(h.dao_id, user).unwrap().unwrap();
        h.store
            .record_vote(
                &NewVote {
                    proposal_id,
                    member_id: member.id,
                    vote_type,
                    voting_power: member.voting_power.unwrap_or(1),
                    reason: None,
                    timestamp: h.clock.now(),
                },
                &|_| None,
            )
            .unwrap();
    }

    #[test]
    fn test_create_proposal_defaults() {
        let h = harness();
        let proposal = h
            .lifecycle
            .create_proposal(h.dao_id, "alice", request("Upgrade firmware"))
            .unwrap();

        assert_eq!(proposal.status, ProposalStatus::Active);
        assert_eq!(proposal.proposer, "0xalice");
        assert_eq!(proposal.category, "GOVERNANCE");
        assert_eq!(proposal.threshold, 60);
        assert_eq!(proposal.quorum, 10);
        assert_eq!(proposal.start_time, t0());
        assert_eq!(proposal.end_time, t0() + Duration::days(5));

        let alice = h.store.find_member(h.dao_id, "alice").unwrap().unwrap();
        assert_eq!(alice.proposals_created, 1);
    }

    #[test]
    fn test_create_proposal_requires_membership_and_dao() {
        let h = harness();
        let err = h
            .lifecycle
            .create_proposal(h.dao_id, "mallory", request("x"))
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Forbidden(_)));

        let err = h.lifecycle.create_proposal(404, "alice", request("x")).unwrap_err();
        assert!(matches!(err, GovernanceError::NotFound("DAO")));

        let err = h.lifecycle.create_proposal(h.dao_id, "", request("x")).unwrap_err();
        assert!(matches!(err, GovernanceError::Unauthorized));
    }

    #[test]
    fn test_create_proposal_validates_fields() {
        let h = harness();
        let mut bad = request("  ");
        let err = h.lifecycle.create_proposal(h.dao_id, "alice", bad.clone()).unwrap_err();
        assert!(matches!(err, GovernanceError::Validation(_)));

        bad.title = "ok".to_string();
        bad.threshold = Some(101);
        let err = h.lifecycle.create_proposal(h.dao_id, "alice", bad).unwrap_err();
        assert!(matches!(err, GovernanceError::Validation(_)));
    }

    #[test]
    fn test_draft_activation_keeps_times() {
        let h = harness();
        let mut draft = request("Draft idea");
        draft.draft = true;
        let created = h.lifecycle.create_proposal(h.dao_id, "alice", draft).unwrap();
        assert_eq!(created.status, ProposalStatus::Draft);

        let err = h.lifecycle.activate_proposal(created.id, "bob").unwrap_err();
        assert!(matches!(err, GovernanceError::Forbidden(_)));

        h.clock.advance(Duration::days(1));
        let activated = h.lifecycle.activate_proposal(created.id, "alice").unwrap();
        assert_eq!(activated.status, ProposalStatus::Active);
        assert_eq!(activated.start_time, created.start_time);
        assert_eq!(activated.end_time, created.end_time);

        let err = h.lifecycle.activate_proposal(created.id, "admin").unwrap_err();
        assert!(matches!(err, GovernanceError::InvalidState(_)));
    }

    #[test]
    fn test_cancel_rejects_terminal_statuses() {
        let h = harness();
        let proposal = h
            .lifecycle
            .create_proposal(h.dao_id, "alice", request("Cancel me"))
            .unwrap();

        let cancelled = h.lifecycle.cancel_proposal(proposal.id, "admin").unwrap();
        assert_eq!(cancelled.status, ProposalStatus::Cancelled);

        let err = h.lifecycle.cancel_proposal(proposal.id, "admin").unwrap_err();
        assert!(matches!(err, GovernanceError::InvalidState(_)));
    }

    #[test]
    fn test_delete_guards() {
        let h = harness();
        let empty = h
            .lifecycle
            .create_proposal(h.dao_id, "alice", request("Empty"))
            .unwrap();
        assert_eq!(h.lifecycle.delete_proposal(empty.id, "alice").unwrap(), empty.id);
        assert!(matches!(
            h.lifecycle.get_proposal(empty.id, None).unwrap_err(),
            GovernanceError::NotFound("Proposal")
        ));

        let voted = h
            .lifecycle
            .create_proposal(h.dao_id, "alice", request("Voted"))
            .unwrap();
        ballot(&h, voted.id, "bob", VoteType::Abstain);
        let err = h.lifecycle.delete_proposal(voted.id, "admin").unwrap_err();
        assert!(matches!(err, GovernanceError::HasVotes));

        h.lifecycle.cancel_proposal(voted.id, "admin").unwrap();
        let err = h.lifecycle.delete_proposal(voted.id, "admin").unwrap_err();
        assert!(matches!(err, GovernanceError::HasVotes));
    }

    #[test]
    fn test_execute_before_end_is_not_concluded() {
        let h = harness();
        let proposal = h
            .lifecycle
            .create_proposal(h.dao_id, "alice", request("Early"))
            .unwrap();
        ballot(&h, proposal.id, "alice", VoteType::For);

        let err = h.lifecycle.execute_proposal(proposal.id, "admin").unwrap_err();
        assert!(matches!(err, GovernanceError::VotingNotConcluded));

        let err = h.lifecycle.execute_proposal(proposal.id, "alice").unwrap_err();
        assert!(matches!(err, GovernanceError::Forbidden(_)));
    }

    #[test]
    fn test_execute_quorum_failure_marks_failed() {
        let h = harness_with(Arc::new(TreasuryLedger::new()), 100);
        let proposal = h
            .lifecycle
            .create_proposal(h.dao_id, "alice", request("Low turnout"))
            .unwrap();
        ballot(&h, proposal.id, "alice", VoteType::For);

        h.clock.advance(Duration::days(5));
        let err = h.lifecycle.execute_proposal(proposal.id, "admin").unwrap_err();
        assert!(err.to_string().contains("Quorum not reached"));

        let stored = h.store.get_proposal(proposal.id).unwrap().unwrap();
        assert_eq!(stored.status, ProposalStatus::Failed);

        let err = h.lifecycle.execute_proposal(proposal.id, "admin").unwrap_err();
        assert!(matches!(err, GovernanceError::InvalidState(_)));
    }

    #[test]
    fn test_execute_threshold_failure() {
        let h = harness();
        let proposal = h
            .lifecycle
            .create_proposal(h.dao_id, "alice", request("Split vote"))
            .unwrap();
        ballot(&h, proposal.id, "alice", VoteType::Abstain);
        ballot(&h, proposal.id, "bob", VoteType::For);

        h.clock.advance(Duration::days(5));
        let err = h.lifecycle.execute_proposal(proposal.id, "admin").unwrap_err();
        assert!(matches!(err, GovernanceError::ThresholdNotMet { threshold: 60, .. }));
    }

    #[test]
    fn test_execute_queues_behind_timelock() {
        let h = harness();
        let proposal = h
            .lifecycle
            .create_proposal(h.dao_id, "alice", request("Ship it"))
            .unwrap();
        ballot(&h, proposal.id, "alice", VoteType::For);
        ballot(&h, proposal.id, "bob", VoteType::Against);

        let concluded = t0() + Duration::days(5);
        h.clock.set(concluded);
        let receipt = h.lifecycle.execute_proposal(proposal.id, "admin").unwrap();
        assert_eq!(receipt.execute_after, concluded + Duration::hours(24));

        let stored = h.store.get_proposal(proposal.id).unwrap().unwrap();
        assert_eq!(stored.status, ProposalStatus::Passed);

        // Repeated execute requests reuse the slot
        h.clock.advance(Duration::hours(3));
        let again = h.lifecycle.execute_proposal(proposal.id, "admin").unwrap();
        assert_eq!(again.execute_after, receipt.execute_after);
    }

    #[test]
    fn test_execute_checks_treasury_for_funding_requests() {
        let mut treasury = MockTreasury::new();
        treasury
            .expect_check_funds_availability()
            .times(1)
            .returning(|_, _| Ok(false));
        let h = harness_with(Arc::new(treasury), 10);

        let mut funded = request("Buy antennas");
        funded.requested_amount = Some(5_000);
        let proposal = h.lifecycle.create_proposal(h.dao_id, "alice", funded).unwrap();
        ballot(&h, proposal.id, "alice", VoteType::For);

        h.clock.advance(Duration::days(6));
        let err = h.lifecycle.execute_proposal(proposal.id, "admin").unwrap_err();
        assert!(matches!(err, GovernanceError::InsufficientFunds));
        assert_eq!(
            h.store.get_proposal(proposal.id).unwrap().unwrap().status,
            ProposalStatus::Active
        );
    }

    #[test]
    fn test_cancel_aborts_queued_execution() {
        let h = harness();
        let proposal = h
            .lifecycle
            .create_proposal(h.dao_id, "alice", request("Abort later"))
            .unwrap();
        ballot(&h, proposal.id, "alice", VoteType::For);

        h.clock.advance(Duration::days(5));
        h.lifecycle.execute_proposal(proposal.id, "admin").unwrap();
        h.lifecycle.cancel_proposal(proposal.id, "alice").unwrap();

        let slot = h.store.get_execution(proposal.id).unwrap().unwrap();
        assert_eq!(slot.state, ExecutionState::Cancelled);
    }

    #[test]
    fn test_views_include_summary_and_caller_vote() {
        let h = harness();
        let first = h
            .lifecycle
            .create_proposal(h.dao_id, "alice", request("First"))
            .unwrap();
        h.clock.advance(Duration::minutes(1));
        let mut second = request("Second");
        second.category = "treasury".to_string();
        h.lifecycle.create_proposal(h.dao_id, "bob", second).unwrap();

        ballot(&h, first.id, "alice", VoteType::For);
        ballot(&h, first.id, "bob", VoteType::Against);

        let view = h.lifecycle.get_proposal(first.id, Some("bob")).unwrap();
        assert_eq!(view.vote_summary.ballot_count, 2);
        assert_eq!(view.vote_summary.total_votes, 35);
        assert!((view.vote_summary.for_percentage - 71.43).abs() < 0.01);
        assert_eq!(view.user_vote.unwrap().vote_type, VoteType::Against);

        let anonymous = h.lifecycle.get_proposal(first.id, None).unwrap();
        assert!(anonymous.user_vote.is_none());

        let page = h
            .lifecycle
            .list_proposals(
                h.dao_id,
                ListProposals {
                    category: Some("Treasury".to_string()),
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        assert_eq!(page.proposals.len(), 1);
        assert_eq!(page.proposals[0].proposal.title, "Second");

        let page = h
            .lifecycle
            .list_proposals(
                h.dao_id,
                ListProposals {
                    page: Some(2),
                    limit: Some(1),
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        assert_eq!(page.proposals.len(), 1);
        assert_eq!(page.proposals[0].proposal.id, first.id);
    }

    #[test]
    fn test_add_member_admin_only_and_unique() {
        let h = harness();
        let join = || AddMember {
            user_id: "dave".to_string(),
            address: "0xdave".to_string(),
            role: None,
            voting_power: None,
        };

        let err = h.lifecycle.add_member(h.dao_id, "alice", join()).unwrap_err();
        assert!(matches!(err, GovernanceError::Forbidden(_)));

        h.lifecycle.add_member(h.dao_id, "admin", join()).unwrap();
        let err = h.lifecycle.add_member(h.dao_id, "admin", join()).unwrap_err();
        assert!(matches!(err, GovernanceError::Conflict(_)));
    }

    #[test]
    fn test_add_member_caps_voting_power() {
        let h = harness();
        let max = GovernanceConfig::default().max_voting_power;
        let join = |user: &str, power: u64| AddMember {
            user_id: user.to_string(),
            address: format!("0x{}", user),
            role: None,
            voting_power: Some(power),
        };

        let err = h
            .lifecycle
            .add_member(h.dao_id, "admin", join("whale", max + 1))
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Validation(_)));
        assert!(h.store.find_member(h.dao_id, "whale").unwrap().is_none());

        let member = h
            .lifecycle
            .add_member(h.dao_id, "admin", join("whale", max))
            .unwrap();
        assert_eq!(member.voting_power, Some(max));
    }
}
