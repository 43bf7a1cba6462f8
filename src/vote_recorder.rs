//! Vote Recorder: validates a ballot and applies it atomically.
//!
//! The early-close rule here is a fixed majority of the voting power cast
//! so far (default >50%). It does not look at the proposal's own
//! `threshold`; that stricter rule runs at execution time in
//! `voting_power::ThresholdCheck`. Both rules are intentional and must stay
//! separate.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::GovernanceConfig;
use crate::error::{GovernanceError, Result, StoreError, VotingClosedReason};
use crate::model::{NewVote, Proposal, ProposalId, ProposalStatus, Vote, VoteType};
use crate::store::ProposalStore;
use crate::voting_power::resolve_voting_power;

/// Early-close rule evaluated after every ballot
#[derive(Debug, Clone, Copy)]
pub struct AutoClosePolicy {
    /// Share of cast power (percent) that must be strictly exceeded
    pub majority_percent: f64,
    /// Hold off until the proposal's quorum has been cast
    pub requires_quorum: bool,
}

impl Default for AutoClosePolicy {
    fn default() -> Self {
        Self {
            majority_percent: 50.0,
            requires_quorum: false,
        }
    }
}

impl AutoClosePolicy {
    pub fn from_config(config: &GovernanceConfig) -> Self {
        Self {
            majority_percent: config.auto_close_majority_percent,
            requires_quorum: config.auto_close_requires_quorum,
        }
    }

    /// PASSED when FOR exceeds the majority, FAILED when AGAINST does
    pub fn decide(&self, proposal: &Proposal) -> Option<ProposalStatus> {
        let tally = proposal.tally();
        if tally.total_votes == 0 {
            return None;
        }
        if self.requires_quorum && tally.total_votes < proposal.quorum {
            return None;
        }

        if tally.for_percentage() > self.majority_percent {
            Some(ProposalStatus::Passed)
        } else if tally.against_percentage() > self.majority_percent {
            Some(ProposalStatus::Failed)
        } else {
            None
        }
    }
}

/// Reject ballots outside the ACTIVE window
pub fn ensure_voting_open(proposal: &Proposal, now: DateTime<Utc>) -> Result<()> {
    if proposal.is_open_at(now) {
        return Ok(());
    }
    if proposal.status != ProposalStatus::Active {
        return Err(GovernanceError::VotingNotActive(VotingClosedReason::Status(
            proposal.status,
        )));
    }
    if now < proposal.start_time {
        return Err(GovernanceError::VotingNotActive(VotingClosedReason::NotStarted));
    }
    Err(GovernanceError::VotingNotActive(VotingClosedReason::Ended))
}

pub struct VoteRecorder {
    store: Arc<dyn ProposalStore>,
    clock: Arc<dyn Clock>,
    policy: AutoClosePolicy,
}

impl VoteRecorder {
    pub fn new(store: Arc<dyn ProposalStore>, clock: Arc<dyn Clock>, policy: AutoClosePolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// Record `user_id`'s ballot on a proposal
    pub fn cast_vote(
        &self,
        proposal_id: ProposalId,
        user_id: &str,
        vote_type: VoteType,
        reason: Option<String>,
    ) -> Result<Vote> {
        let proposal = self
            .store
            .get_proposal(proposal_id)?
            .ok_or(GovernanceError::NotFound("Proposal"))?;

        let now = self.clock.now();
        ensure_voting_open(&proposal, now)?;

        let member = self
            .store
            .find_member(proposal.dao_id, user_id)?
            .ok_or_else(|| GovernanceError::forbidden("You must be a DAO member to vote"))?;

        // Fast path only; the UNIQUE(proposal_id, member_id) constraint is what holds under races
        if self.store.find_vote(proposal_id, member.id)?.is_some() {
            return Err(GovernanceError::DuplicateVote);
        }

        let voting_power = resolve_voting_power(&member);
        let ballot = NewVote {
            proposal_id,
            member_id: member.id,
            vote_type,
            voting_power,
            reason: reason
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty()),
            timestamp: now,
        };

        let policy = self.policy;
        let recorded = match self.store.record_vote(&ballot, &|p| policy.decide(p)) {
            Ok(recorded) => recorded,
            Err(StoreError::Duplicate(_)) => return Err(GovernanceError::DuplicateVote),
            Err(StoreError::Stale(_)) => return Err(self.closed_since(proposal_id, now)),
            Err(e) => return Err(e.into()),
        };

        info!(
            "Vote cast on proposal {}: {} with power {} by member {}",
            proposal_id, vote_type, voting_power, member.id
        );
        debug!(
            "Proposal {} tally: for={} against={} abstain={} total={}",
            proposal_id,
            recorded.proposal.votes_for,
            recorded.proposal.votes_against,
            recorded.proposal.votes_abstain,
            recorded.proposal.total_votes
        );

        if let Some(status) = recorded.closed_as {
            info!(
                "Proposal {} auto-closed as {} ({:.2}% for, {:.2}% against)",
                proposal_id,
                status,
                recorded.proposal.tally().for_percentage(),
                recorded.proposal.tally().against_percentage()
            );
        }

        Ok(recorded.vote)
    }

    /// Error for a proposal that stopped accepting votes mid-request
    fn closed_since(&self, proposal_id: ProposalId, now: DateTime<Utc>) -> GovernanceError {
        match self.store.get_proposal(proposal_id) {
            Ok(Some(proposal)) => match ensure_voting_open(&proposal, now) {
                Err(e) => e,
                Ok(()) => GovernanceError::VotingNotActive(VotingClosedReason::Ended),
            },
            Ok(None) => GovernanceError::NotFound("Proposal"),
            Err(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::{MemberRole, NewDao, NewMember, NewProposal};
    use crate::sqlite_store::SqliteStore;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap()
    }

    struct Fixture {
        store: Arc<SqliteStore>,
        clock: Arc<ManualClock>,
        recorder: VoteRecorder,
        proposal_id: ProposalId,
    }

    fn fixture(policy: AutoClosePolicy, quorum: u64) -> Fixture {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(t0()));

        let dao = store
            .create_dao(
                &NewDao {
                    name: "Relay DAO".to_string(),
                    governance_token: None,
                    voting_period_days: 7,
                    quorum_threshold: quorum,
                },
                t0(),
            )
            .unwrap();

        let mut proposer_id = 0;
        for (user, power) in [("alice", Some(10)), ("bob", Some(5)), ("carol", None)] {
            let member = store
                .add_member(
                    &NewMember {
                        dao_id: dao.id,
                        user_id: user.to_string(),
                        address: format!("0x{}", user),
                        role: MemberRole::Member,
                        voting_power: power,
                    },
                    t0(),
                )
                .unwrap();
            if user == "alice" {
                proposer_id = member.id;
            }
        }

        let proposal = store
            .create_proposal(
                &NewProposal {
                    dao_id: dao.id,
                    title: "Raise node rewards".to_string(),
                    description: "Increase epoch rewards by 5%".to_string(),
                    proposer: "0xalice".to_string(),
                    category: "GOVERNANCE".to_string(),
                    status: ProposalStatus::Active,
                    requested_amount: None,
                    quorum,
                    threshold: 60,
                    start_time: t0(),
                    end_time: t0() + Duration::days(7),
                    discussion: None,
                    attachments: vec![],
                },
                proposer_id,
                t0(),
            )
            .unwrap();

        let recorder = VoteRecorder::new(store.clone(), clock.clone(), policy);
        Fixture {
            store,
            clock,
            recorder,
            proposal_id: proposal.id,
        }
    }

    #[test]
    fn test_first_majority_vote_auto_closes() {
        let f = fixture(AutoClosePolicy::default(), 0);
        f.clock.advance(Duration::hours(1));

        let vote = f
            .recorder
            .cast_vote(f.proposal_id, "alice", VoteType::For, Some("  ship it ".to_string()))
            .unwrap();
        assert_eq!(vote.voting_power, 10);
        assert_eq!(vote.reason.as_deref(), Some("ship it"));

        let proposal = f.store.get_proposal(f.proposal_id).unwrap().unwrap();
        assert_eq!(proposal.status, ProposalStatus::Passed);
        assert_eq!(proposal.end_time, t0() + Duration::hours(1));

        let err = f
            .recorder
            .cast_vote(f.proposal_id, "bob", VoteType::Against, None)
            .unwrap_err();
        assert!(matches!(
            err,
            GovernanceError::VotingNotActive(VotingClosedReason::Status(ProposalStatus::Passed))
        ));
    }

    #[test]
    fn test_quorum_gated_auto_close_uses_post_increment_tally() {
        let policy = AutoClosePolicy {
            majority_percent: 50.0,
            requires_quorum: true,
        };
        let f = fixture(policy, 15);
        f.clock.advance(Duration::minutes(5));

        f.recorder.cast_vote(f.proposal_id, "alice", VoteType::For, None).unwrap();
        let proposal = f.store.get_proposal(f.proposal_id).unwrap().unwrap();
        assert_eq!(proposal.status, ProposalStatus::Active);

        f.clock.advance(Duration::minutes(5));
        f.recorder.cast_vote(f.proposal_id, "bob", VoteType::Against, None).unwrap();

        let proposal = f.store.get_proposal(f.proposal_id).unwrap().unwrap();
        assert_eq!(proposal.votes_for, 10);
        assert_eq!(proposal.votes_against, 5);
        assert_eq!(proposal.total_votes, 15);
        assert_eq!(proposal.status, ProposalStatus::Passed);
        assert_eq!(proposal.end_time, t0() + Duration::minutes(10));
    }

    #[test]
    fn test_against_majority_fails_proposal() {
        let f = fixture(AutoClosePolicy::default(), 0);
        f.recorder.cast_vote(f.proposal_id, "bob", VoteType::Against, None).unwrap();

        let proposal = f.store.get_proposal(f.proposal_id).unwrap().unwrap();
        assert_eq!(proposal.status, ProposalStatus::Failed);
    }

    #[test]
    fn test_abstain_only_does_not_close() {
        let f = fixture(AutoClosePolicy::default(), 0);
        f.recorder.cast_vote(f.proposal_id, "carol", VoteType::Abstain, None).unwrap();

        let proposal = f.store.get_proposal(f.proposal_id).unwrap().unwrap();
        assert_eq!(proposal.status, ProposalStatus::Active);
        assert_eq!(proposal.votes_abstain, 1, "unset voting power counts as 1");
    }

    #[test]
    fn test_duplicate_vote_rejected() {
        let f = fixture(AutoClosePolicy::default(), 0);
        f.recorder.cast_vote(f.proposal_id, "carol", VoteType::Abstain, None).unwrap();

        let err = f
            .recorder
            .cast_vote(f.proposal_id, "carol", VoteType::For, None)
            .unwrap_err();
        assert!(matches!(err, GovernanceError::DuplicateVote));
    }

    #[test]
    fn test_non_member_forbidden() {
        let f = fixture(AutoClosePolicy::default(), 0);
        let err = f
            .recorder
            .cast_vote(f.proposal_id, "mallory", VoteType::For, None)
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Forbidden(_)));
        assert!(err.to_string().contains("DAO member"));
    }

    #[test]
    fn test_unknown_proposal_not_found() {
        let f = fixture(AutoClosePolicy::default(), 0);
        let err = f.recorder.cast_vote(999, "alice", VoteType::For, None).unwrap_err();
        assert!(matches!(err, GovernanceError::NotFound("Proposal")));
    }

    #[test]
    fn test_voting_window_edges() {
        let f = fixture(AutoClosePolicy::default(), 0);

        f.clock.set(t0() - Duration::seconds(1));
        let err = f
            .recorder
            .cast_vote(f.proposal_id, "carol", VoteType::Abstain, None)
            .unwrap_err();
        assert!(matches!(
            err,
            GovernanceError::VotingNotActive(VotingClosedReason::NotStarted)
        ));

        f.clock.set(t0() + Duration::days(7) + Duration::seconds(1));
        let err = f
            .recorder
            .cast_vote(f.proposal_id, "carol", VoteType::Abstain, None)
            .unwrap_err();
        assert!(matches!(err, GovernanceError::VotingNotActive(VotingClosedReason::Ended)));

        // end_time itself is inclusive
        f.clock.set(t0() + Duration::days(7));
        f.recorder
            .cast_vote(f.proposal_id, "carol", VoteType::Abstain, None)
            .unwrap();
    }

    #[test]
    fn test_majority_rule_ignores_proposal_threshold() {
        let policy = AutoClosePolicy::default();
        let f = fixture(policy, 0);
        let mut proposal = f.store.get_proposal(f.proposal_id).unwrap().unwrap();
        proposal.threshold = 90;
        proposal.votes_for = 55;
        proposal.votes_against = 45;
        proposal.total_votes = 100;

        assert_eq!(policy.decide(&proposal), Some(ProposalStatus::Passed));

        proposal.votes_for = 50;
        proposal.votes_against = 50;
        assert_eq!(policy.decide(&proposal), None, "exactly 50% does not close");
    }

    mod conservation {
        use super::*;
        use crate::voting_power::recount;
        use proptest::prelude::*;

        fn vote_type(index: u8) -> VoteType {
            match index % 3 {
                0 => VoteType::For,
                1 => VoteType::Against,
                _ => VoteType::Abstain,
            }
        }

        proptest! {
            #[test]
            fn prop_tally_matches_ballots(ballots in proptest::collection::vec((0u8..3, 0u64..500), 1..16)) {
                // Quorum out of reach keeps the proposal open for every ballot
                let policy = AutoClosePolicy { majority_percent: 50.0, requires_quorum: true };
                let f = fixture(policy, 1_000_000);

                for (i, (choice, power)) in ballots.iter().enumerate() {
                    let user = format!("voter-{}", i);
                    f.store.add_member(&NewMember {
                        dao_id: 1,
                        user_id: user.clone(),
                        address: format!("0xv{}", i),
                        role: MemberRole::Member,
                        voting_power: Some(*power),
                    }, t0()).unwrap();
                    f.recorder.cast_vote(f.proposal_id, &user, vote_type(*choice), None).unwrap();
                }

                let proposal = f.store.get_proposal(f.proposal_id).unwrap().unwrap();
                let votes = f.store.list_votes(f.proposal_id).unwrap();
                prop_assert_eq!(votes.len(), ballots.len());
                prop_assert!(proposal.tally().is_conserved());
                prop_assert_eq!(proposal.tally(), recount(&votes));

                let expected: u64 = ballots.iter().map(|(_, p)| if *p == 0 { 1 } else { *p }).sum();
                prop_assert_eq!(proposal.total_votes, expected);
            }
        }
    }
}
