// Library interface for the DAO governance service
// Allows testing and reuse of the voting core without the HTTP layer

pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod execution_queue;
pub mod lifecycle;
pub mod lock_utils;
pub mod model;
pub mod service;
pub mod sqlite_store;
pub mod store;
pub mod treasury;
pub mod vote_recorder;
pub mod voting_power;

pub use error::{GovernanceError, StoreError, VotingClosedReason};
pub use service::GovernanceService;
