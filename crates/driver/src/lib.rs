//! State loops for the `op-validator` agents.
//!
//! The crate is split into three orchestrators and the [Driver] loops that feed them:
//! - [Challenger]: validates submitted outputs against the local rollup node, opens challenges
//!   against invalid ones, and plays either side of the bisection game through to a fault proof.
//! - [Guardian]: a security council member that confirms or rejects council transactions and
//!   ends challenges the challenger abandoned.
//! - [OutputSubmitter]: submits the trusted node's outputs in the rounds this validator may join.
//!
//! All ledger access goes through [LedgerGateway] and all rollup node access goes through
//! [RollupSource], so the orchestrators run unchanged against in-memory doubles.

use anyhow::Result;
use async_trait::async_trait;

/// Contains the smart contract bindings used by the [ContractGateway].
mod bindings;

mod config;
pub use config::{ProofSystem, ValidatorConfig};

mod errors;
pub use errors::*;

mod types;
pub use types::*;

mod gateway;
pub use gateway::{ContractGateway, LedgerGateway};

mod rollup;
pub use rollup::{L2BlockRef, NodeRollupSource, OutputAtBlockResponse, OutputWithProofResponse, RollupSource};

mod challenger;
pub use challenger::Challenger;

mod guardian;
pub use guardian::{Guardian, GuardianPeriod, InspectionBatch};

mod submitter;
pub use submitter::{OutputSubmitter, Round, PUBLIC_ROUND_ADDRESS};

mod drivers;
pub use drivers::*;

#[cfg(test)]
mod test_utils;

/// The [Driver] trait defines the interface for all driver loops that are ran by the
/// `op-validator` binary.
#[async_trait]
pub trait Driver: Send {
    /// Starts the [Driver] loop. The loop only returns on an unrecoverable error.
    async fn start_loop(self) -> Result<()>;
}
