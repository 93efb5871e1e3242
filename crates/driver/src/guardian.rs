//! The `guardian` module contains the [Guardian], the security council member's orchestrator.
//!
//! A guardian re-validates outputs outside the bisection game: it confirms the dismissal of a
//! challenge whose proof deleted a correct output, confirms forced deletions of outputs that are
//! really invalid, requests such deletions itself when a proof could not be submitted, and claims
//! the timeouts challengers leave unclaimed.

use crate::{
    ChallengeCreated, DeletionRequested, LedgerGateway, RollupSource, Tick, ValidationRequested,
    ValidatorConfig, ValidatorError, ValidatorResult,
};
use ethers::types::{Address, H256, U256};
use op_validator_solvers::challenge::{is_output_deleted, ChallengeStatus};
use std::{ops::Range, sync::Arc};

/// Where an output stands relative to the guardian's window: after the challenge creation period
/// and before finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardianPeriod {
    /// Challenges can still be created; check again later.
    NotYet,
    /// The guardian may act on the output.
    Active,
    /// The output is finalized; nothing can be done anymore.
    Over,
}

/// A batch of outputs whose creation period has ended but which are not finalized yet, together
/// with the L1 block window to search their `ReadyToProve` events in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectionBatch {
    /// The output indexes to inspect.
    pub outputs: Range<u64>,
    /// The first L1 block of the finalization window.
    pub from_l1: u64,
    /// The L1 head.
    pub to_l1: u64,
    /// The checkpoint to resume from on the next batch.
    pub checkpoint: u64,
}

/// The [Guardian] acts on security council requests and on challenges left unresolved.
#[derive(Clone)]
pub struct Guardian {
    config: Arc<ValidatorConfig>,
    ledger: Arc<dyn LedgerGateway>,
    rollup: Arc<dyn RollupSource>,
}

impl Guardian {
    /// Creates a new [Guardian].
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

    /// Returns true if `output_root` equals the trusted output root at `l2_block_number`.
    pub async fn validate_l2_output(&self, output_root: H256, l2_block_number: u64) -> ValidatorResult<bool> {
        tracing::info!(target: "guardian", "Validating output {:?} at block #{}", output_root, l2_block_number);
        let local = self
            .rollup
            .output_at_block(l2_block_number)
            .await
            .map_err(ValidatorError::Rollup)?;
        Ok(local.output_root == output_root)
    }

    /// Returns true if the council transaction still needs this guardian's confirmation: the
    /// output is not finalized and the transaction is neither confirmed by us nor executed.
    pub async fn check_confirm_condition(&self, transaction_id: U256, output_index: u64) -> ValidatorResult<bool> {
        if self
            .ledger
            .is_output_finalized(output_index)
            .await
            .map_err(ValidatorError::Ledger)?
        {
            tracing::info!(target: "guardian", "Output {} is already finalized", output_index);
            return Ok(false);
        }
        if self
            .ledger
            .is_transaction_confirmed(transaction_id)
            .await
            .map_err(ValidatorError::Ledger)?
        {
            tracing::info!(target: "guardian", "Transaction {} is already confirmed", transaction_id);
            return Ok(false);
        }
        if self
            .ledger
            .is_transaction_executed(transaction_id)
            .await
            .map_err(ValidatorError::Ledger)?
        {
            tracing::info!(target: "guardian", "Transaction {} is already executed", transaction_id);
            return Ok(false);
        }
        Ok(true)
    }

    /// Handles a validation request for a deleted output. If the deleted output was correct, the
    /// dismissal transaction is confirmed.
    ///
    /// ### Returns
    /// - `Ok(Some(H256))`: The confirmation tx.
    /// - `Ok(None)`: No confirmation needed.
    pub async fn try_confirm_validation(&self, event: &ValidationRequested) -> ValidatorResult<Option<H256>> {
        let output_index = self
            .ledger
            .get_l2_output_index_after(event.l2_block_number)
            .await
            .map_err(ValidatorError::Ledger)?;
        if !self
            .check_confirm_condition(event.transaction_id, output_index)
            .await?
        {
            return Ok(None);
        }

        if !self
            .validate_l2_output(event.output_root, event.l2_block_number)
            .await?
        {
            tracing::info!(target: "guardian", "Output {} was deleted correctly", output_index);
            return Ok(None);
        }

        tracing::info!(target: "guardian", "Output {} was deleted incorrectly, confirming dismissal {}", output_index, event.transaction_id);
        self.ledger
            .confirm_transaction(event.transaction_id)
            .await
            .map(Some)
            .map_err(ValidatorError::Ledger)
    }

    /// Handles a forced deletion request. The request is confirmed only if the output really is
    /// invalid.
    pub async fn try_confirm_deletion(&self, event: &DeletionRequested) -> ValidatorResult<Option<H256>> {
        if !self
            .check_confirm_condition(event.transaction_id, event.output_index)
            .await?
        {
            return Ok(None);
        }

        let output = self
            .ledger
            .get_l2_output(event.output_index)
            .await
            .map_err(ValidatorError::Ledger)?;
        if self
            .validate_l2_output(output.output_root, output.l2_block_number)
            .await?
        {
            tracing::info!(target: "guardian", "Deletion of output {} requested, but it is valid", event.output_index);
            return Ok(None);
        }

        tracing::info!(target: "guardian", "Confirming deletion {} of invalid output {}", event.transaction_id, event.output_index);
        self.ledger
            .confirm_transaction(event.transaction_id)
            .await
            .map(Some)
            .map_err(ValidatorError::Ledger)
    }

    /// Returns where the output at `output_index` stands relative to the guardian's window.
    pub async fn in_guardian_period(&self, output_index: u64) -> ValidatorResult<GuardianPeriod> {
        if self
            .ledger
            .is_output_finalized(output_index)
            .await
            .map_err(ValidatorError::Ledger)?
        {
            return Ok(GuardianPeriod::Over);
        }
        if self
            .ledger
            .is_in_creation_period(output_index)
            .await
            .map_err(ValidatorError::Ledger)?
        {
            return Ok(GuardianPeriod::NotYet);
        }
        Ok(GuardianPeriod::Active)
    }

    /// Claims the timeout of `challenger` if it is still unclaimed.
    ///
    /// ### Returns
    /// - `Ok(Tick::Stop)`: The challenge is over, or the timeout was claimed.
    /// - `Ok(Tick::Continue)`: The challenge is still being played.
    pub async fn try_challenger_timeout(&self, output_index: u64, challenger: Address) -> ValidatorResult<Tick> {
        let status = self
            .ledger
            .challenge_status(output_index, challenger)
            .await
            .map_err(ValidatorError::Ledger)?;
        match status {
            ChallengeStatus::None => Ok(Tick::Stop),
            ChallengeStatus::ChallengerTimeout => {
                tracing::info!(target: "guardian", "Claiming challenger timeout of output {} (challenger {:?})", output_index, challenger);
                self.ledger
                    .challenger_timeout(output_index, challenger)
                    .await
                    .map_err(ValidatorError::Ledger)?;
                Ok(Tick::Stop)
            }
            _ => Ok(Tick::Continue),
        }
    }

    /// Returns true if the output at `output_index` should be deleted by force: a challenge
    /// against it reached `ReadyToProve` within L1 blocks `[from, to]`, yet the output is still
    /// present and invalid.
    pub async fn should_be_deleted(&self, output_index: u64, from: u64, to: u64) -> ValidatorResult<bool> {
        if !self
            .ledger
            .ready_to_prove_emitted(output_index, from, to)
            .await
            .map_err(ValidatorError::Ledger)?
        {
            return Ok(false);
        }

        let output = self
            .ledger
            .get_l2_output(output_index)
            .await
            .map_err(ValidatorError::Ledger)?;
        if is_output_deleted(&output.output_root) {
            tracing::info!(target: "guardian", "Output {} has already been deleted", output_index);
            return Ok(false);
        }

        Ok(!self
            .validate_l2_output(output.output_root, output.l2_block_number)
            .await?)
    }

    /// Returns the outputs that entered the guardian window since `checkpoint`. Without a
    /// checkpoint, every output in the window is returned.
    ///
    /// ### Returns
    /// - `Ok(None)`: No output has left its creation period yet.
    pub async fn outputs_to_inspect(&self, checkpoint: Option<u64>) -> ValidatorResult<Option<InspectionBatch>> {
        let status = self
            .rollup
            .sync_status()
            .await
            .map_err(ValidatorError::Rollup)?;
        let finalization_period = self
            .ledger
            .finalization_period_seconds()
            .await
            .map_err(ValidatorError::Ledger)?;
        let creation_period = self
            .ledger
            .creation_period_seconds()
            .await
            .map_err(ValidatorError::Ledger)?;
        let l2_block_time = self
            .ledger
            .l2_block_time()
            .await
            .map_err(ValidatorError::Ledger)?
            .max(1);

        let current_l2 = status.finalized_l2;
        let creation_period_l2 = creation_period / l2_block_time;
        if current_l2 <= creation_period_l2 {
            tracing::warn!(target: "guardian", "No output has left its creation period yet (L2 #{})", current_l2);
            return Ok(None);
        }

        let from_l1 = status
            .head_l1
            .saturating_sub(self.config.l1_blocks_in(finalization_period))
            .max(1);
        let creation_ended_l2 = current_l2 - creation_period_l2;
        let end = self
            .ledger
            .get_l2_output_index_after(creation_ended_l2)
            .await
            .map_err(ValidatorError::Ledger)?;
        let start = match checkpoint {
            Some(checkpoint) => checkpoint + 1,
            None => {
                let finalized_l2 = current_l2
                    .saturating_sub(finalization_period / l2_block_time)
                    .max(1);
                self.ledger
                    .get_l2_output_index_after(finalized_l2)
                    .await
                    .map_err(ValidatorError::Ledger)?
            }
        };

        Ok(Some(InspectionBatch {
            outputs: start..end.max(start),
            from_l1,
            to_l1: status.head_l1,
            checkpoint: end.saturating_sub(1).max(checkpoint.unwrap_or_default()),
        }))
    }

    /// Inspects the output at `output_index` once, requesting its deletion if it should be
    /// deleted.
    pub async fn inspect_output_tick(&self, output_index: u64, from: u64, to: u64) -> ValidatorResult<Tick> {
        match self.in_guardian_period(output_index).await? {
            GuardianPeriod::NotYet => return Ok(Tick::Continue),
            GuardianPeriod::Over => return Ok(Tick::Stop),
            GuardianPeriod::Active => {}
        }

        if !self.should_be_deleted(output_index, from, to).await? {
            tracing::info!(target: "guardian", "No need to delete output {}", output_index);
            return Ok(Tick::Stop);
        }

        let tx = self
            .ledger
            .request_deletion(output_index)
            .await
            .map_err(ValidatorError::Ledger)?;
        tracing::info!(target: "guardian", "Requested deletion of output {} in tx {:?}", output_index, tx);
        Ok(Tick::Stop)
    }

    /// Handles a created challenge once on behalf of the guardian.
    pub async fn challenger_timeout_tick(&self, event: &ChallengeCreated) -> ValidatorResult<Tick> {
        match self.in_guardian_period(event.output_index).await? {
            GuardianPeriod::NotYet => Ok(Tick::Continue),
            GuardianPeriod::Over => Ok(Tick::Stop),
            GuardianPeriod::Active => {
                self.try_challenger_timeout(event.output_index, event.challenger)
                    .await
            }
        }
    }

    /// Retries the validation request until it is handled.
    pub async fn process_output_validation(&self, event: ValidationRequested) {
        tracing::info!(target: "guardian", "Processing validation request {} of deleted output at block #{}", event.transaction_id, event.l2_block_number);
        let mut interval = tokio::time::interval(self.config.guardian_poll_interval);
        loop {
            interval.tick().await;
            match self.try_confirm_validation(&event).await {
                Ok(_) => return,
                Err(e) => {
                    tracing::error!(target: "guardian", "Failed to handle validation request {}: {}", event.transaction_id, e);
                }
            }
        }
    }

    /// Retries the deletion request until it is handled.
    pub async fn process_output_deletion(&self, event: DeletionRequested) {
        tracing::info!(target: "guardian", "Processing deletion request {} of output {}", event.transaction_id, event.output_index);
        let mut interval = tokio::time::interval(self.config.guardian_poll_interval);
        loop {
            interval.tick().await;
            match self.try_confirm_deletion(&event).await {
                Ok(_) => return,
                Err(e) => {
                    tracing::error!(target: "guardian", "Failed to handle deletion request {}: {}", event.transaction_id, e);
                }
            }
        }
    }

    /// Tracks a created challenge until its timeout no longer needs to be claimed.
    pub async fn process_challenger_timeout(&self, event: ChallengeCreated) {
        tracing::info!(target: "guardian", "Tracking challenge against output {} (challenger {:?})", event.output_index, event.challenger);
        let mut interval = tokio::time::interval(self.config.guardian_poll_interval);
        loop {
            interval.tick().await;
            match self.challenger_timeout_tick(&event).await {
                Ok(Tick::Stop) => return,
                Ok(Tick::Continue | Tick::Pending) => {}
                Err(e) => {
                    tracing::error!(target: "guardian", "Failed to handle challenge against output {}: {}", event.output_index, e);
                }
            }
        }
    }

    /// Inspects the output at `output_index` until it needs no more attention.
    pub async fn inspect_output(&self, output_index: u64, from: u64, to: u64) {
        tracing::info!(target: "guardian", "Inspecting output {} for forced deletion", output_index);
        let mut interval = tokio::time::interval(self.config.guardian_poll_interval);
        loop {
            interval.tick().await;
            match self.inspect_output_tick(output_index, from, to).await {
                Ok(Tick::Stop) => return,
                Ok(Tick::Continue | Tick::Pending) => {}
                Err(e) => {
                    tracing::error!(target: "guardian", "Failed to inspect output {}: {}", output_index, e);
                }
            }
        }
    }
}
