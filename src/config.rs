use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::model::DaoId;

/// Hard ceiling on a member's voting power, leaving headroom for tally sums
/// in SQLite's signed 64-bit integers
pub const VOTING_POWER_CEILING: u64 = i64::MAX as u64 / 1024;

/// Governance service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub governance: GovernanceConfig,
    #[serde(default)]
    pub treasury: TreasuryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file, or ":memory:"
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Percent of FOR votes required at execution time when a proposal sets none
    pub default_threshold: u32,
    /// FOR or AGAINST share (percent of cast power) that closes voting early
    pub auto_close_majority_percent: f64,
    /// Only auto-close once the proposal's quorum has been cast
    pub auto_close_requires_quorum: bool,
    /// Delay between queueing and execution of a passed proposal
    pub execution_timelock_hours: i64,
    /// How often the execution worker looks for due proposals
    pub worker_interval_secs: u64,
    pub default_page_limit: u32,
    pub max_page_limit: u32,
    /// Largest voting power a member may be enrolled with
    pub max_voting_power: u64,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            default_threshold: 60,
            auto_close_majority_percent: 50.0,
            auto_close_requires_quorum: false,
            execution_timelock_hours: 24,
            worker_interval_secs: 60,
            default_page_limit: 20,
            max_page_limit: 100,
            max_voting_power: 1_000_000_000_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreasuryConfig {
    /// Initial treasury balances
    #[serde(default)]
    pub balances: Vec<TreasuryBalance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreasuryBalance {
    pub dao_id: DaoId,
    pub amount: u64,
}

impl TreasuryConfig {
    pub fn balance_map(&self) -> HashMap<DaoId, u64> {
        let mut map = HashMap::new();
        for balance in &self.balances {
            *map.entry(balance.dao_id).or_insert(0) += balance.amount;
        }
        map
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8090,
            },
            database: DatabaseConfig {
                path: "./data/governance.db".to_string(),
            },
            governance: GovernanceConfig::default(),
            treasury: TreasuryConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(&self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Invalid port: cannot be 0");
        }

        if self.database.path.trim().is_empty() {
            anyhow::bail!("Invalid database path: cannot be empty");
        }

        let governance = &self.governance;
        if governance.default_threshold == 0 || governance.default_threshold > 100 {
            anyhow::bail!("Invalid default_threshold: must be between 1 and 100");
        }

        if !(0.0..100.0).contains(&governance.auto_close_majority_percent) {
            anyhow::bail!("Invalid auto_close_majority_percent: must be in [0, 100)");
        }

        if governance.execution_timelock_hours < 0 {
            anyhow::bail!("Invalid execution_timelock_hours: cannot be negative");
        }

        if governance.worker_interval_secs == 0 {
            anyhow::bail!("Invalid worker_interval_secs: must be > 0");
        }

        if governance.default_page_limit == 0
            || governance.default_page_limit > governance.max_page_limit
        {
            anyhow::bail!("Invalid default_page_limit: must be in 1..=max_page_limit");
        }

        if governance.max_voting_power == 0 || governance.max_voting_power > VOTING_POWER_CEILING {
            anyhow::bail!(
                "Invalid max_voting_power: must be in 1..={}",
                VOTING_POWER_CEILING
            );
        }

        Ok(())
    }
}
