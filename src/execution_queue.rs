//! Execution Queue: timelocked execution slots for passed proposals.
//!
//! A proposal never reaches EXECUTED before `execute_after`, which is set
//! when the slot is reserved. The background worker releases due slots and
//! debits the treasury for funds-requesting proposals at release time. A
//! slot that fails at release leaves the proposal PASSED; executing it
//! again re-arms the slot with a fresh timelock.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::{GovernanceError, Result};
use crate::model::{ProposalId, ProposalStatus, QueuedExecution};
use crate::store::ProposalStore;
use crate::treasury::Treasury;

/// Outcome of one pass over the due slots
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ExecutionReport {
    pub executed: Vec<ProposalId>,
    pub failed: Vec<(ProposalId, String)>,
}

impl ExecutionReport {
    pub fn is_empty(&self) -> bool {
        self.executed.is_empty() && self.failed.is_empty()
    }
}

pub struct ExecutionQueue {
    store: Arc<dyn ProposalStore>,
    treasury: Arc<dyn Treasury>,
    clock: Arc<dyn Clock>,
    timelock: Duration,
}

impl ExecutionQueue {
    pub fn new(
        store: Arc<dyn ProposalStore>,
        treasury: Arc<dyn Treasury>,
        clock: Arc<dyn Clock>,
        timelock: Duration,
    ) -> Self {
        Self {
            store,
            treasury,
            clock,
            timelock,
        }
    }

    pub fn timelock(&self) -> Duration {
        self.timelock
    }

    /// Reserve an execution slot `timelock` from now.
    ///
    /// Idempotent while the slot is queued: a second call returns it and
    /// leaves its `execute_after` untouched. A failed or aborted slot is
    /// re-armed from now.
    pub fn queue_proposal_execution(&self, proposal_id: ProposalId) -> Result<QueuedExecution> {
        let now = self.clock.now();
        let (slot, newly_queued) =
            self.store
                .enqueue_execution(proposal_id, now, now + self.timelock)?;

        if newly_queued {
            info!(
                "Proposal {} queued for execution after {}",
                proposal_id, slot.execute_after
            );
        } else {
            debug!(
                "Proposal {} already has a {} execution slot (after {})",
                proposal_id,
                slot.state.as_str(),
                slot.execute_after
            );
        }

        Ok(slot)
    }

    /// Abort a pending execution. Returns false when nothing was queued.
    pub fn abort(&self, proposal_id: ProposalId) -> Result<bool> {
        let aborted = self.store.cancel_execution(proposal_id)?;
        if aborted {
            info!("Aborted queued execution of proposal {}", proposal_id);
        }
        Ok(aborted)
    }

    pub fn get(&self, proposal_id: ProposalId) -> Result<Option<QueuedExecution>> {
        Ok(self.store.get_execution(proposal_id)?)
    }

    /// Release every slot whose timelock has elapsed at `now`
    pub fn process_due(&self, now: DateTime<Utc>) -> Result<ExecutionReport> {
        let mut report = ExecutionReport::default();

        for slot in self.store.due_executions(now)? {
            let proposal_id = slot.proposal_id;
            match self.release(&slot, now) {
                Ok(None) => report.executed.push(proposal_id),
                Ok(Some(reason)) => {
                    if self.store.fail_execution(proposal_id, &reason, now)? {
                        warn!("Execution of proposal {} failed: {}", proposal_id, reason);
                        report.failed.push((proposal_id, reason));
                    }
                }
                // Left queued; retried on the next pass
                Err(e) => error!("Failed to release proposal {}: {}", proposal_id, e),
            }
        }

        if !report.is_empty() {
            info!(
                "Execution pass: {} executed, {} failed",
                report.executed.len(),
                report.failed.len()
            );
        }
        Ok(report)
    }

    /// `Ok(None)` when executed, `Ok(Some(reason))` when the slot must fail
    fn release(&self, slot: &QueuedExecution, now: DateTime<Utc>) -> Result<Option<String>> {
        let proposal = match self.store.get_proposal(slot.proposal_id)? {
            Some(proposal) => proposal,
            None => return Ok(Some("proposal no longer exists".to_string())),
        };

        if proposal.status != ProposalStatus::Passed {
            return Ok(Some(format!("proposal is {}", proposal.status)));
        }

        let withdrawn = proposal.requested_funds();
        if let Some(amount) = withdrawn {
            if !self.treasury.withdraw_funds(proposal.dao_id, amount)? {
                return Ok(Some(GovernanceError::InsufficientFunds.to_string()));
            }
        }

        let completed = match self.store.complete_execution(slot.proposal_id, now) {
            Ok(completed) => completed,
            Err(e) => {
                if let Some(amount) = withdrawn {
                    self.treasury.refund_funds(proposal.dao_id, amount)?;
                }
                return Err(e.into());
            }
        };

        if completed {
            info!("Proposal {} executed", slot.proposal_id);
            return Ok(None);
        }

        if let Some(amount) = withdrawn {
            self.treasury.refund_funds(proposal.dao_id, amount)?;
        }
        Ok(Some("proposal changed state before execution".to_string()))
    }

    /// Start the background task that releases due executions
    pub fn spawn_execution_worker(queue: Arc<Self>, every: StdDuration) -> JoinHandle<()> {
        info!(
            "Starting execution worker (interval: {:?}, timelock: {}h)",
            every,
            queue.timelock.num_hours()
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);

            loop {
                interval.tick().await;

                let now = queue.clock.now();
                if let Err(e) = queue.process_due(now) {
                    error!("Execution worker pass failed: {}", e);
                }
            }
        })
    }
}
