//! The `submitter` module contains the [OutputSubmitter], which submits the trusted node's outputs
//! to the L2OutputOracle.
//!
//! Each submission slot is split into two rounds. In the priority round only the validator
//! selected by the ValidatorPool may submit. If it does not, the slot turns into a public round
//! that any bonded validator may join.

use crate::{LedgerGateway, RollupSource, ValidatorConfig, ValidatorError, ValidatorResult};
use anyhow::anyhow;
use ethers::types::Address;
use std::{sync::Arc, time::Duration};

/// The number of rounds a submission slot is split into.
const ROUNDS_PER_SLOT: u64 = 2;

/// The next validator reported while the current round is public.
pub const PUBLIC_ROUND_ADDRESS: Address = Address::repeat_byte(0xff);

/// The submission round the ledger is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Round {
    /// Any bonded validator may submit.
    Public,
    /// Only the selected validator may submit.
    Priority {
        /// Whether this validator is the selected one.
        selected: bool,
    },
}

impl Round {
    /// Returns the round in which `next_validator` is the selected submitter, as seen by
    /// `validator`.
    pub fn from_next_validator(next_validator: Address, validator: Address) -> Self {
        if next_validator == PUBLIC_ROUND_ADDRESS {
            Self::Public
        } else {
            Self::Priority {
                selected: next_validator == validator,
            }
        }
    }

    /// Returns true if this validator may submit in the round.
    pub fn can_join(&self, allow_public_round: bool) -> bool {
        match self {
            Self::Public => allow_public_round,
            Self::Priority { selected } => *selected,
        }
    }
}

/// The [OutputSubmitter] waits for the L2 chain to reach the next output's block and submits the
/// trusted output when this validator is allowed to.
#[derive(Clone)]
pub struct OutputSubmitter {
    config: Arc<ValidatorConfig>,
    ledger: Arc<dyn LedgerGateway>,
    rollup: Arc<dyn RollupSource>,
}

impl OutputSubmitter {
    /// Creates a new [OutputSubmitter].
    pub fn new(
        config: Arc<ValidatorConfig>,
        ledger: Arc<dyn LedgerGateway>,
        rollup: Arc<dyn RollupSource>,
    ) -> Self {
        Self {
            config,
            ledger,
            rollup,
        }
    }

    /// Returns the L2 block the submitter considers current: the finalized head, or the safe head
    /// when non-finalized submissions are allowed.
    pub async fn current_block_number(&self) -> ValidatorResult<u64> {
        let status = self
            .rollup
            .sync_status()
            .await
            .map_err(ValidatorError::Rollup)?;
        Ok(if self.config.allow_non_finalized {
            status.safe_l2
        } else {
            status.finalized_l2
        })
    }

    /// Returns the current submission round.
    pub async fn round(&self) -> ValidatorResult<Round> {
        let next_validator = self
            .ledger
            .next_validator()
            .await
            .map_err(ValidatorError::Ledger)?;
        let round = Round::from_next_validator(next_validator, self.config.validator);
        tracing::debug!(target: "submitter", "Current round is {:?} (next validator {:?})", round, next_validator);
        Ok(round)
    }

    /// Returns true if this validator is out of jail and its unbonded deposit covers the bond of
    /// a new output.
    pub async fn can_submit_output(&self) -> ValidatorResult<bool> {
        let validator = self.config.validator;
        if self
            .ledger
            .is_in_jail(validator)
            .await
            .map_err(ValidatorError::Ledger)?
        {
            tracing::warn!(target: "submitter", "Validator is in jail");
            return Ok(false);
        }

        let deposit = self
            .ledger
            .unbonded_deposit(validator)
            .await
            .map_err(ValidatorError::Ledger)?;
        let required = self
            .ledger
            .required_bond_amount()
            .await
            .map_err(ValidatorError::Ledger)?;
        if deposit < required {
            tracing::warn!(target: "submitter", "Unbonded deposit {} is less than the required bond {}", deposit, required);
            return Ok(false);
        }
        Ok(true)
    }

    /// Computes how long to wait before the output at `next_block_number` can be submitted.
    ///
    /// ### Takes
    /// - `next_block_number`: The L2 block the next output must commit to.
    ///
    /// ### Returns
    /// - `Ok(Duration::ZERO)`: The output can be submitted now.
    /// - `Ok(Duration)`: The time until the L2 chain reaches the block at which the next attempt
    ///   should be made.
    /// - `Err(ValidatorError)`: The node or the ledger could not be queried.
    pub async fn wait_time(&self, next_block_number: u64) -> ValidatorResult<Duration> {
        let current = self.current_block_number().await?;
        let buffer = self.config.submitter_round_buffer;
        tracing::info!(target: "submitter", "Current L2 block #{}, next output block #{}", current, next_block_number);

        // The output also commits to the hash of the block after it.
        if current < next_block_number + 1 {
            let target = next_block_number.saturating_sub(buffer);
            tracing::info!(target: "submitter", "Submission interval has not elapsed, waiting for L2 block #{}", target);
            return self.left_time_for_l2_blocks(current, target).await;
        }

        if !self.round().await?.can_join(self.config.allow_public_round) {
            let round_interval = self
                .ledger
                .submission_interval()
                .await
                .map_err(ValidatorError::Ledger)?
                / ROUNDS_PER_SLOT;
            let target = next_block_number + round_interval.saturating_sub(buffer);
            tracing::info!(target: "submitter", "Not allowed in the current round, waiting for L2 block #{}", target);
            return self.left_time_for_l2_blocks(current, target).await;
        }

        Ok(Duration::ZERO)
    }

    async fn left_time_for_l2_blocks(&self, current: u64, target: u64) -> ValidatorResult<Duration> {
        if target < current {
            return Ok(self.config.submitter_retry_interval);
        }
        let l2_block_time = self
            .ledger
            .l2_block_time()
            .await
            .map_err(ValidatorError::Ledger)?;
        Ok(Duration::from_secs((target - current) * l2_block_time))
    }

    /// Submits the next output if this validator may, and returns how long to wait before the
    /// next attempt. A successful submission returns [Duration::ZERO] so the following output is
    /// tried right away.
    pub async fn try_submit_l2_output(&self) -> ValidatorResult<Duration> {
        let next_block_number = self
            .ledger
            .next_block_number()
            .await
            .map_err(ValidatorError::Ledger)?;

        let wait = self.wait_time(next_block_number).await?;
        if !wait.is_zero() {
            return Ok(wait);
        }
        if !self.can_submit_output().await? {
            return Ok(self.config.submitter_retry_interval);
        }

        let output = self
            .rollup
            .output_proposal(next_block_number)
            .await
            .map_err(ValidatorError::Rollup)?;
        if output.l2_block_number != next_block_number {
            return Err(ValidatorError::Rollup(anyhow!(
                "node returned the output of block #{} for block #{}",
                output.l2_block_number,
                next_block_number
            )));
        }

        let tx = self
            .ledger
            .submit_l2_output(output)
            .await
            .map_err(ValidatorError::Ledger)?;
        tracing::info!(target: "submitter", "Submitted output of L2 block #{} in tx {:?}", next_block_number, tx);
        Ok(Duration::ZERO)
    }
}
