//! Governance service: wires the store and collaborators into the voting
//! components and exposes them as one handle.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use crate::clock::Clock;
use crate::config::GovernanceConfig;
use crate::execution_queue::ExecutionQueue;
use crate::lifecycle::ProposalLifecycle;
use crate::store::ProposalStore;
use crate::treasury::Treasury;
use crate::vote_recorder::{AutoClosePolicy, VoteRecorder};
use crate::voting_power::VotingPowerResolver;

pub struct GovernanceService {
    pub votes: VoteRecorder,
    pub lifecycle: ProposalLifecycle,
    pub voting_power: Arc<VotingPowerResolver>,
    pub execution_queue: Arc<ExecutionQueue>,
    worker_interval: StdDuration,
}

impl GovernanceService {
    pub fn new(
        store: Arc<dyn ProposalStore>,
        treasury: Arc<dyn Treasury>,
        clock: Arc<dyn Clock>,
        config: GovernanceConfig,
    ) -> Self {
        let voting_power = Arc::new(VotingPowerResolver::new(store.clone()));
        let execution_queue = Arc::new(ExecutionQueue::new(
            store.clone(),
            treasury.clone(),
            clock.clone(),
            Duration::hours(config.execution_timelock_hours),
        ));
        let votes = VoteRecorder::new(
            store.clone(),
            clock.clone(),
            AutoClosePolicy::from_config(&config),
        );
        let worker_interval = StdDuration::from_secs(config.worker_interval_secs);

        info!(
            "Governance service ready (auto-close >{}%{}, timelock {}h)",
            config.auto_close_majority_percent,
            if config.auto_close_requires_quorum {
                " after quorum"
            } else {
                ""
            },
            config.execution_timelock_hours
        );

        let lifecycle = ProposalLifecycle::new(
            store,
            treasury,
            clock,
            voting_power.clone(),
            execution_queue.clone(),
            config,
        );

        Self {
            votes,
            lifecycle,
            voting_power,
            execution_queue,
            worker_interval,
        }
    }

    /// Start the timelock worker on the current tokio runtime
    pub fn spawn_execution_worker(&self) -> JoinHandle<()> {
        ExecutionQueue::spawn_execution_worker(self.execution_queue.clone(), self.worker_interval)
    }
}
