//! Treasury collaborator for funds-requesting proposals.
//!
//! `check_funds_availability` is advisory and only gates queueing. Funds
//! leave the treasury when a proposal is released from the timelock.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{debug, info};

use crate::error::StoreError;
use crate::lock_utils::{read_lock_or_recover, write_lock_or_recover};
use crate::model::DaoId;

/// DAO treasury balances
#[cfg_attr(test, mockall::automock)]
pub trait Treasury: Send + Sync {
    /// Whether `amount` can be released from the DAO's treasury
    fn check_funds_availability(&self, dao_id: DaoId, amount: u64) -> Result<bool, StoreError>;

    /// Debit `amount` if the balance covers it. Returns false, leaving the
    /// balance untouched, when it does not.
    fn withdraw_funds(&self, dao_id: DaoId, amount: u64) -> Result<bool, StoreError>;

    /// Return a withdrawal whose execution did not go through
    fn refund_funds(&self, dao_id: DaoId, amount: u64) -> Result<(), StoreError>;
}

/// Treasury balances held in memory, seeded from configuration
#[derive(Debug, Default)]
pub struct TreasuryLedger {
    balances: RwLock<HashMap<DaoId, u64>>,
}

impl TreasuryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balances(balances: HashMap<DaoId, u64>) -> Self {
        info!("Treasury ledger seeded with {} DAO balances", balances.len());
        Self {
            balances: RwLock::new(balances),
        }
    }

    pub fn deposit(&self, dao_id: DaoId, amount: u64) -> u64 {
        let mut balances = write_lock_or_recover(&self.balances, "treasury balances");
        let balance = balances.entry(dao_id).or_insert(0);
        *balance = balance.saturating_add(amount);
        debug!("Treasury of DAO {} credited {} (balance {})", dao_id, amount, balance);
        *balance
    }

    pub fn balance(&self, dao_id: DaoId) -> u64 {
        read_lock_or_recover(&self.balances, "treasury balances")
            .get(&dao_id)
            .copied()
            .unwrap_or(0)
    }
}

impl Treasury for TreasuryLedger {
    fn check_funds_availability(&self, dao_id: DaoId, amount: u64) -> Result<bool, StoreError> {
        Ok(self.balance(dao_id) >= amount)
    }

    fn withdraw_funds(&self, dao_id: DaoId, amount: u64) -> Result<bool, StoreError> {
        let mut balances = write_lock_or_recover(&self.balances, "treasury balances");
        let balance = balances.entry(dao_id).or_insert(0);
        if *balance < amount {
            return Ok(false);
        }
        *balance -= amount;
        info!("Treasury of DAO {} debited {} (balance {})", dao_id, amount, balance);
        Ok(true)
    }

    fn refund_funds(&self, dao_id: DaoId, amount: u64) -> Result<(), StoreError> {
        self.deposit(dao_id, amount);
        Ok(())
    }
}
