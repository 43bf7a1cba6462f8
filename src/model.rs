//! Governance records: DAOs, memberships, proposals, votes and queued executions.
//!
//! These are plain data carriers. Business rules live in the component
//! modules (`vote_recorder`, `lifecycle`, `voting_power`, `execution_queue`).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type DaoId = i64;
pub type MemberId = i64;
pub type ProposalId = i64;
pub type VoteId = i64;

/// Role of a member inside one DAO
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemberRole {
    Admin,
    Member,
    Chair,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Admin => "ADMIN",
            MemberRole::Member => "MEMBER",
            MemberRole::Chair => "CHAIR",
        }
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(MemberRole::Admin),
            "MEMBER" => Ok(MemberRole::Member),
            "CHAIR" => Ok(MemberRole::Chair),
            other => Err(format!("unknown member role: {}", other)),
        }
    }
}

/// Proposal status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProposalStatus {
    /// Created but not yet open for voting
    Draft,
    /// Voting is open
    Active,
    /// Decided in favour, awaiting execution
    Passed,
    /// Decided against, or failed the execution-time threshold check
    Failed,
    /// Executed after the timelock elapsed
    Executed,
    /// Withdrawn by an admin or the proposer
    Cancelled,
}

impl ProposalStatus {
    pub const ALL: [ProposalStatus; 6] = [
        ProposalStatus::Draft,
        ProposalStatus::Active,
        ProposalStatus::Passed,
        ProposalStatus::Failed,
        ProposalStatus::Executed,
        ProposalStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Draft => "DRAFT",
            ProposalStatus::Active => "ACTIVE",
            ProposalStatus::Passed => "PASSED",
            ProposalStatus::Failed => "FAILED",
            ProposalStatus::Executed => "EXECUTED",
            ProposalStatus::Cancelled => "CANCELLED",
        }
    }

    /// EXECUTED and CANCELLED admit no further transition of any kind
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProposalStatus::Executed | ProposalStatus::Cancelled)
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProposalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        ProposalStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == upper)
            .ok_or_else(|| format!("unknown proposal status: {}", s))
    }
}

/// Ballot choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VoteType {
    For,
    Against,
    Abstain,
}

impl VoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteType::For => "FOR",
            VoteType::Against => "AGAINST",
            VoteType::Abstain => "ABSTAIN",
        }
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FOR" => Ok(VoteType::For),
            "AGAINST" => Ok(VoteType::Against),
            "ABSTAIN" => Ok(VoteType::Abstain),
            other => Err(format!("unknown vote type: {}", other)),
        }
    }
}

/// A governance unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dao {
    pub id: DaoId,
    pub name: String,
    /// Governance token reference (mint address or symbol)
    pub governance_token: Option<String>,
    /// Default voting duration in days
    pub voting_period_days: u32,
    /// Minimum voting power that must be cast for an outcome to count
    pub quorum_threshold: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDao {
    pub name: String,
    pub governance_token: Option<String>,
    pub voting_period_days: u32,
    pub quorum_threshold: u64,
}

/// A user's membership in one DAO
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaoMember {
    pub id: MemberId,
    pub dao_id: DaoId,
    pub user_id: String,
    /// On-chain address; proposals are attributed by address, not user id
    pub address: String,
    pub role: MemberRole,
    /// Stored weight; unset or zero counts as 1
    pub voting_power: Option<u64>,
    pub proposals_created: u64,
    pub votes_participated: u64,
    pub last_activity: Option<DateTime<Utc>>,
    pub joined_at: DateTime<Utc>,
}

impl DaoMember {
    pub fn is_admin(&self) -> bool {
        self.role == MemberRole::Admin
    }
}

#[derive(Debug, Clone)]
pub struct NewMember {
    pub dao_id: DaoId,
    pub user_id: String,
    pub address: String,
    pub role: MemberRole,
    pub voting_power: Option<u64>,
}

/// Running vote totals of a proposal, in voting power units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tally {
    pub votes_for: u64,
    pub votes_against: u64,
    pub votes_abstain: u64,
    pub total_votes: u64,
}

impl Tally {
    /// Share of `part` in the total, in percent. Zero when nothing was cast.
    pub fn percentage(&self, part: u64) -> f64 {
        if self.total_votes == 0 {
            0.0
        } else {
            part as f64 / self.total_votes as f64 * 100.0
        }
    }

    pub fn for_percentage(&self) -> f64 {
        self.percentage(self.votes_for)
    }

    pub fn against_percentage(&self) -> f64 {
        self.percentage(self.votes_against)
    }

    pub fn abstain_percentage(&self) -> f64 {
        self.percentage(self.votes_abstain)
    }

    /// Tally after adding one ballot of `power` weight. Counters saturate.
    pub fn with_vote(mut self, vote_type: VoteType, power: u64) -> Self {
        let counter = match vote_type {
            VoteType::For => &mut self.votes_for,
            VoteType::Against => &mut self.votes_against,
            VoteType::Abstain => &mut self.votes_abstain,
        };
        *counter = counter.saturating_add(power);
        self.total_votes = self.total_votes.saturating_add(power);
        self
    }

    pub fn is_conserved(&self) -> bool {
        self.votes_for
            .checked_add(self.votes_against)
            .and_then(|sum| sum.checked_add(self.votes_abstain))
            == Some(self.total_votes)
    }
}

/// A single governance proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: ProposalId,
    pub dao_id: DaoId,
    pub title: String,
    pub description: String,
    /// Proposer's member address
    pub proposer: String,
    /// Uppercased free-form category (INVESTMENT, GOVERNANCE, TREASURY, ...)
    pub category: String,
    pub status: ProposalStatus,
    pub requested_amount: Option<u64>,
    /// Copied from the DAO's quorum threshold at creation time
    pub quorum: u64,
    /// Percent of FOR votes required at execution time
    pub threshold: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub votes_for: u64,
    pub votes_against: u64,
    pub votes_abstain: u64,
    pub total_votes: u64,
    pub discussion: Option<String>,
    pub attachments: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Proposal {
    pub fn tally(&self) -> Tally {
        Tally {
            votes_for: self.votes_for,
            votes_against: self.votes_against,
            votes_abstain: self.votes_abstain,
            total_votes: self.total_votes,
        }
    }

    /// Voting is open at `now`: ACTIVE and inside [start_time, end_time]
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ProposalStatus::Active && self.start_time <= now && now <= self.end_time
    }

    /// Amount to release from the treasury, if the proposal asks for any
    pub fn requested_funds(&self) -> Option<u64> {
        self.requested_amount.filter(|amount| *amount > 0)
    }
}

#[derive(Debug, Clone)]
pub struct NewProposal {
    pub dao_id: DaoId,
    pub title: String,
    pub description: String,
    pub proposer: String,
    pub category: String,
    pub status: ProposalStatus,
    pub requested_amount: Option<u64>,
    pub quorum: u64,
    pub threshold: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub discussion: Option<String>,
    pub attachments: Vec<String>,
}

/// One member's ballot on one proposal. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: VoteId,
    pub proposal_id: ProposalId,
    pub member_id: MemberId,
    pub vote_type: VoteType,
    /// Member's voting power snapshot at vote time
    pub voting_power: u64,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewVote {
    pub proposal_id: ProposalId,
    pub member_id: MemberId,
    pub vote_type: VoteType,
    pub voting_power: u64,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Filtered, paginated proposal listing
#[derive(Debug, Clone)]
pub struct ProposalQuery {
    pub dao_id: DaoId,
    pub status: Option<ProposalStatus>,
    pub category: Option<String>,
    pub offset: u32,
    pub limit: u32,
}

/// State of a timelocked execution slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionState {
    Queued,
    Executed,
    Failed,
    Cancelled,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Queued => "QUEUED",
            ExecutionState::Executed => "EXECUTED",
            ExecutionState::Failed => "FAILED",
            ExecutionState::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for ExecutionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(ExecutionState::Queued),
            "EXECUTED" => Ok(ExecutionState::Executed),
            "FAILED" => Ok(ExecutionState::Failed),
            "CANCELLED" => Ok(ExecutionState::Cancelled),
            other => Err(format!("unknown execution state: {}", other)),
        }
    }
}

/// Execution slot reserved for a passed proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedExecution {
    pub proposal_id: ProposalId,
    pub queued_at: DateTime<Utc>,
    /// Earliest moment the proposal may become EXECUTED
    pub execute_after: DateTime<Utc>,
    pub state: ExecutionState,
    pub executed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}
