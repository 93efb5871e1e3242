//! The `challenger` module contains the [Challenger], the orchestrator that detects invalid
//! outputs, creates challenges against them, and plays both sides of the bisection game.
//!
//! Every operation re-reads the authoritative status from the ledger immediately before composing
//! its action. A status may still change between the read and the submission; the ledger rejects
//! such stale submissions.

use crate::{
    ChallengeInfo, FaultSubmission, LedgerGateway, OutputRange, Outputs, PreconditionError,
    ProveOutcome, RollupSource, Tick, ValidatorConfig, ValidatorError, ValidatorResult,
};
use ethers::types::{Address, H256};
use op_validator_prover::{FaultProof, ProofFetcher, ProofInput, ProofJob, ProofPoll, ProofSystemKind, ProverError};
use op_validator_solvers::challenge::{Action, ChallengeStatus, Role, Segments};
use std::sync::Arc;

/// The number of final pair words the Colosseum verifies. The remaining words hash the public
/// input, which the contract recomputes itself.
const SUBMITTED_PAIR_WORDS: usize = 4;

/// The [Challenger] decides and submits the next protocol action for every challenge this
/// validator takes part in.
#[derive(Clone)]
pub struct Challenger {
    config: Arc<ValidatorConfig>,
    ledger: Arc<dyn LedgerGateway>,
    rollup: Arc<dyn RollupSource>,
    prover: Option<Arc<dyn ProofFetcher>>,
}

impl Challenger {
    /// Creates a new [Challenger].
    ///
    /// ### Takes
    /// - `config`: The validator configuration.
    /// - `ledger`: The on-chain challenge and bond state.
    /// - `rollup`: The trusted view of the L2 chain.
    /// - `prover`: The proving backend. Without one, faults cannot be proven.
    pub fn new(
        config: Arc<ValidatorConfig>,
        ledger: Arc<dyn LedgerGateway>,
        rollup: Arc<dyn RollupSource>,
        prover: Option<Arc<dyn ProofFetcher>>,
    ) -> Self {
        Self {
            config,
            ledger,
            rollup,
            prover,
        }
    }

    /// Returns the role this validator plays in a challenge between `asserter` and `challenger`,
    /// or `None` if the challenge does not concern it.
    pub fn role_in(&self, asserter: Address, challenger: Address) -> Option<Role> {
        if asserter == self.config.validator {
            Some(Role::Asserter)
        } else if challenger == self.config.validator && self.config.challenger_enabled {
            Some(Role::Challenger)
        } else {
            None
        }
    }

    /// Returns the submitted output at `output_index` together with the trusted node's output at
    /// the same block.
    pub async fn outputs_at_index(&self, output_index: u64) -> ValidatorResult<Outputs> {
        let remote = self
            .ledger
            .get_l2_output(output_index)
            .await
            .map_err(ValidatorError::Ledger)?;
        let local = self
            .rollup
            .output_at_block(remote.l2_block_number)
            .await
            .map_err(ValidatorError::Rollup)?;
        Ok(Outputs { remote, local })
    }

    /// Compares the output at `output_index` against the trusted node.
    ///
    /// ### Returns
    /// - `Ok(None)`: The output is valid.
    /// - `Ok(Some(OutputRange))`: The output is invalid; the range covers the blocks it commits
    ///   to.
    pub async fn validate_output(&self, output_index: u64) -> ValidatorResult<Option<OutputRange>> {
        let outputs = self.outputs_at_index(output_index).await?;
        self.output_range(output_index, &outputs).await
    }

    async fn output_range(
        &self,
        output_index: u64,
        outputs: &Outputs,
    ) -> ValidatorResult<Option<OutputRange>> {
        if outputs.remote.output_root == outputs.local.output_root {
            return Ok(None);
        }

        let interval = self
            .ledger
            .submission_interval()
            .await
            .map_err(ValidatorError::Ledger)?;
        let end_block = outputs.remote.l2_block_number;
        let start_block = end_block.checked_sub(interval).ok_or_else(|| {
            ValidatorError::Segments(anyhow::anyhow!(
                "output {} at block #{} precedes the first submission interval",
                output_index,
                end_block
            ))
        })?;

        Ok(Some(OutputRange {
            output_index,
            start_block,
            end_block,
            l1_origin: outputs.local.l1_origin,
        }))
    }

    /// Returns true if this validator may lock a bond in a new challenge: it is not jailed and its
    /// unbonded deposit covers the required bond.
    pub async fn can_create_challenge(&self) -> ValidatorResult<bool> {
        Ok(self.ineligibility().await?.is_none())
    }

    async fn ineligibility(&self) -> ValidatorResult<Option<String>> {
        let validator = self.config.validator;
        if self
            .ledger
            .is_in_jail(validator)
            .await
            .map_err(ValidatorError::Ledger)?
        {
            return Ok(Some("validator is in jail".to_string()));
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
            return Ok(Some(format!(
                "unbonded deposit {} is less than the required bond {}",
                deposit, required
            )));
        }

        tracing::debug!(target: "challenger", "Unbonded deposit {} covers the required bond {}", deposit, required);
        Ok(None)
    }

    /// Creates a challenge against the output at `output_index`.
    ///
    /// The output must still be in its creation period, must differ from the trusted node's
    /// output, must not be deleted, and this validator must have no challenge in progress against
    /// it and be eligible to lock a bond.
    pub async fn create_challenge(&self, output_index: u64) -> ValidatorResult<H256> {
        if !self
            .ledger
            .is_in_creation_period(output_index)
            .await
            .map_err(ValidatorError::Ledger)?
        {
            return Err(PreconditionError::OutsideCreationWindow(output_index).into());
        }

        let outputs = self.outputs_at_index(output_index).await?;
        let range = self
            .output_range(output_index, &outputs)
            .await?
            .ok_or(PreconditionError::OutputValid(output_index))?;
        if outputs.remote.is_deleted() {
            return Err(PreconditionError::OutputDeleted(output_index).into());
        }

        let status = self
            .ledger
            .challenge_status(output_index, self.config.validator)
            .await
            .map_err(ValidatorError::Ledger)?;
        if !status.allows_creation() {
            return Err(PreconditionError::ChallengeInProgress(output_index).into());
        }

        if let Some(reason) = self.ineligibility().await? {
            return Err(PreconditionError::NotEligible(reason).into());
        }

        tracing::info!(
            target: "challenger",
            "Crafting createChallenge tx for output {} (blocks #{}..#{}, L1 origin #{})",
            output_index,
            range.start_block,
            range.end_block,
            range.l1_origin.number
        );
        let segments = self
            .build_segments(1, range.start_block, range.end_block - range.start_block)
            .await?;
        self.ledger
            .create_challenge(output_index, range.l1_origin, segments.hashes)
            .await
            .map_err(ValidatorError::Ledger)
    }

    /// Builds this validator's segments for `turn`, spanning `[start, start + size)`. Every
    /// checkpoint holds the trusted output root at its block.
    pub async fn build_segments(&self, turn: u8, start: u64, size: u64) -> ValidatorResult<Segments> {
        let length = self
            .ledger
            .segments_length(turn)
            .await
            .map_err(ValidatorError::Ledger)?;
        let mut segments =
            Segments::empty(start, size, length as usize).map_err(ValidatorError::Segments)?;

        for (i, block_number) in segments.block_numbers().into_iter().enumerate() {
            let local = self
                .rollup
                .output_at_block(block_number)
                .await
                .map_err(ValidatorError::Rollup)?;
            segments
                .set_hash_value(i, local.output_root)
                .map_err(ValidatorError::Segments)?;
        }

        Ok(segments)
    }

    /// Selects the child of `segments` that holds the first disagreement with the trusted node.
    ///
    /// ### Returns
    /// - `Ok(u64)`: The position of the child whose end checkpoint is the first mismatch.
    /// - `Err(PreconditionError::FirstSegmentMismatch)`: The starting checkpoints differ.
    /// - `Err(PreconditionError::NoFaultPosition)`: Every checkpoint matches.
    pub async fn select_fault_position(&self, segments: &Segments) -> ValidatorResult<u64> {
        for (i, block_number) in segments.block_numbers().into_iter().enumerate() {
            let local = self
                .rollup
                .output_at_block(block_number)
                .await
                .map_err(ValidatorError::Rollup)?;
            if segments.hashes[i] != local.output_root {
                return match i {
                    0 => Err(PreconditionError::FirstSegmentMismatch.into()),
                    i => Ok(i as u64 - 1),
                };
            }
        }

        Err(PreconditionError::NoFaultPosition.into())
    }

    async fn ensure_not_finalized(&self, output_index: u64) -> ValidatorResult<()> {
        if self
            .ledger
            .is_output_finalized(output_index)
            .await
            .map_err(ValidatorError::Ledger)?
        {
            return Err(PreconditionError::OutputFinalized(output_index).into());
        }
        Ok(())
    }

    async fn ensure_status(
        &self,
        output_index: u64,
        challenger: Address,
        expected: &[ChallengeStatus],
    ) -> ValidatorResult<ChallengeStatus> {
        let actual = self
            .ledger
            .challenge_status(output_index, challenger)
            .await
            .map_err(ValidatorError::Ledger)?;
        if !expected.contains(&actual) {
            return Err(PreconditionError::UnexpectedStatus {
                expected: expected.to_vec(),
                actual,
            }
            .into());
        }
        Ok(actual)
    }

    async fn challenge(&self, output_index: u64, challenger: Address) -> ValidatorResult<ChallengeInfo> {
        self.ledger
            .get_challenge(output_index, challenger)
            .await
            .map_err(ValidatorError::Ledger)
    }

    /// Bisects the challenge keyed by `(output_index, challenger)` on behalf of `role`.
    ///
    /// The output must be neither finalized nor deleted, and it must be `role`'s turn.
    pub async fn bisect(&self, output_index: u64, challenger: Address, role: Role) -> ValidatorResult<H256> {
        self.ensure_not_finalized(output_index).await?;
        let output = self
            .ledger
            .get_l2_output(output_index)
            .await
            .map_err(ValidatorError::Ledger)?;
        if output.is_deleted() {
            return Err(PreconditionError::OutputDeleted(output_index).into());
        }

        let turn = match role {
            Role::Asserter => ChallengeStatus::AsserterTurn,
            Role::Challenger => ChallengeStatus::ChallengerTurn,
        };
        self.ensure_status(output_index, challenger, &[turn]).await?;

        tracing::info!(target: "challenger", "Crafting bisect tx for output {} as {:?} (challenger {:?})", output_index, role, challenger);
        let challenge = self.challenge(output_index, challenger).await?;
        let position = self.select_fault_position(&challenge.segments).await?;
        let (start, size) = challenge
            .segments
            .next_segments_range(position)
            .map_err(ValidatorError::Segments)?;
        let next = self.build_segments(challenge.turn + 1, start, size).await?;

        self.ledger
            .bisect(output_index, challenger, position, next.hashes)
            .await
            .map_err(ValidatorError::Ledger)
    }

    /// Proves the fault of the single remaining block transition of the challenge keyed by
    /// `(output_index, challenger)`.
    ///
    /// The status must be `ReadyToProve`, or `AsserterTimeout` when `skip_fault_position_selection`
    /// is set; in that case the ledger already holds the segments and the first transition is
    /// proven.
    ///
    /// ### Returns
    /// - `Ok(ProveOutcome::Submitted(H256))`: The proof was submitted.
    /// - `Ok(ProveOutcome::Retry)`: The proving backend is still working. Nothing was submitted.
    pub async fn prove_fault(
        &self,
        output_index: u64,
        challenger: Address,
        skip_fault_position_selection: bool,
    ) -> ValidatorResult<ProveOutcome> {
        let prover = self
            .prover
            .as_ref()
            .ok_or(PreconditionError::ProverNotConfigured)?;
        self.ensure_not_finalized(output_index).await?;
        let expected = if skip_fault_position_selection {
            ChallengeStatus::AsserterTimeout
        } else {
            ChallengeStatus::ReadyToProve
        };
        self.ensure_status(output_index, challenger, &[expected]).await?;

        let challenge = self.challenge(output_index, challenger).await?;
        let position = if skip_fault_position_selection {
            0
        } else {
            self.select_fault_position(&challenge.segments).await?
        };
        let target_block = challenge.segments.start + position + 1;

        tracing::info!(
            target: "challenger",
            "Crafting proveFault tx for output {} with {} proof of block #{}",
            output_index,
            prover.kind(),
            target_block
        );
        let job = self.proof_job(prover.kind(), &challenge, target_block).await?;
        prover.request(&job).await?;
        let proof = match prover.poll(&job).await? {
            ProofPoll::Pending(status) => {
                tracing::info!(target: "challenger", "Proof of block #{} is not ready ({}), retrying later", target_block, status);
                return Ok(ProveOutcome::Retry);
            }
            ProofPoll::Ready(proof) => proof,
        };

        let submission = match proof {
            FaultProof::Trace(proof_and_pair) => {
                if proof_and_pair.pair.len() < SUBMITTED_PAIR_WORDS {
                    return Err(ProverError::ShortPair(proof_and_pair.pair.len(), SUBMITTED_PAIR_WORDS).into());
                }
                let public_input_proof = self
                    .rollup
                    .public_input_proof(target_block - 1)
                    .await
                    .map_err(ValidatorError::Rollup)?;
                FaultSubmission::ZkEvm {
                    public_input_proof,
                    proof: proof_and_pair.proof,
                    pair: proof_and_pair.pair[..SUBMITTED_PAIR_WORDS].to_vec(),
                }
            }
            FaultProof::ZkVm {
                vkey_hash,
                public_values,
                proof,
            } => FaultSubmission::ZkVm {
                vkey_hash,
                public_values,
                proof,
            },
        };

        let tx = self
            .ledger
            .prove_fault(output_index, position, submission)
            .await
            .map_err(ValidatorError::Ledger)?;
        Ok(ProveOutcome::Submitted(tx))
    }

    async fn proof_job(
        &self,
        kind: ProofSystemKind,
        challenge: &ChallengeInfo,
        block_number: u64,
    ) -> ValidatorResult<ProofJob> {
        let input = match kind {
            ProofSystemKind::Trace => ProofInput::Trace(
                self.rollup
                    .block_trace(block_number)
                    .await
                    .map_err(ValidatorError::Rollup)?,
            ),
            ProofSystemKind::Witness => ProofInput::Block {
                block_hash: self
                    .rollup
                    .block_hash(block_number)
                    .await
                    .map_err(ValidatorError::Rollup)?,
                l1_head: challenge.l1_head,
            },
        };
        Ok(ProofJob {
            block_number,
            input,
        })
    }

    /// Claims the timeout of `challenger` to take its bond. The output may already be finalized.
    pub async fn challenger_timeout(&self, output_index: u64, challenger: Address) -> ValidatorResult<H256> {
        self.ensure_status(output_index, challenger, &[ChallengeStatus::ChallengerTimeout])
            .await?;

        tracing::info!(target: "challenger", "Crafting challengerTimeout tx for output {} (challenger {:?})", output_index, challenger);
        self.ledger
            .challenger_timeout(output_index, challenger)
            .await
            .map_err(ValidatorError::Ledger)
    }

    /// Cancels this validator's challenge against `output_index` to recover the bond.
    pub async fn cancel_challenge(&self, output_index: u64) -> ValidatorResult<H256> {
        self.ensure_not_finalized(output_index).await?;
        self.ensure_status(
            output_index,
            self.config.validator,
            &[
                ChallengeStatus::ChallengerTurn,
                ChallengeStatus::AsserterTurn,
                ChallengeStatus::AsserterTimeout,
                ChallengeStatus::ReadyToProve,
            ],
        )
        .await?;

        tracing::info!(target: "challenger", "Crafting cancelChallenge tx for output {}", output_index);
        self.ledger
            .cancel_challenge(output_index)
            .await
            .map_err(ValidatorError::Ledger)
    }

    /// Handles a newly submitted output once: challenges it if it is invalid.
    ///
    /// ### Returns
    /// - `Ok(Tick::Stop)`: The output needs no more attention.
    /// - `Ok(Tick::Continue)`: The output is invalid but no challenge could be created yet.
    pub async fn handle_output_tick(&self, output_index: u64) -> ValidatorResult<Tick> {
        match self.create_challenge(output_index).await {
            Ok(tx) => {
                tracing::info!(target: "challenger", "Created challenge against output {} in tx {:?}", output_index, tx);
                Ok(Tick::Stop)
            }
            Err(ValidatorError::Precondition(PreconditionError::NotEligible(reason))) => {
                tracing::warn!(target: "challenger", "Found invalid output {}, but {}", output_index, reason);
                Ok(Tick::Continue)
            }
            Err(ValidatorError::Precondition(reason)) => {
                tracing::info!(target: "challenger", "Done handling output {}: {}", output_index, reason);
                Ok(Tick::Stop)
            }
            Err(e) => Err(e),
        }
    }

    /// Polls the output at `output_index` until it is challenged or needs no challenge.
    pub async fn handle_output(&self, output_index: u64) {
        tracing::info!(target: "challenger", "Handling output {} to detect an invalid output", output_index);
        let mut interval = tokio::time::interval(self.config.output_poll_interval);

        loop {
            interval.tick().await;
            match self.handle_output_tick(output_index).await {
                Ok(Tick::Stop) => return,
                Ok(Tick::Continue | Tick::Pending) => {}
                Err(e) => {
                    tracing::error!(target: "challenger", "Failed to handle output {}: {}", output_index, e);
                }
            }
        }
    }

    /// Reads the challenge keyed by `(output_index, challenger)` once and submits the action its
    /// status implies for this validator.
    pub async fn handle_challenge_tick(
        &self,
        output_index: u64,
        asserter: Address,
        challenger: Address,
    ) -> ValidatorResult<Tick> {
        let Some(role) = self.role_in(asserter, challenger) else {
            return Ok(Tick::Stop);
        };

        let status = self
            .ledger
            .challenge_status(output_index, challenger)
            .await
            .map_err(ValidatorError::Ledger)?;
        let output = self
            .ledger
            .get_l2_output(output_index)
            .await
            .map_err(ValidatorError::Ledger)?;
        let finalized = self
            .ledger
            .is_output_finalized(output_index)
            .await
            .map_err(ValidatorError::Ledger)?;

        let action = status.action_for(role, output.is_deleted(), finalized);
        tracing::debug!(target: "challenger", "Challenge ({}, {:?}) is {}, {:?} acts with {:?}", output_index, challenger, status, role, action);

        match action {
            Action::Stop => return Ok(Tick::Stop),
            Action::Wait => {}
            Action::Bisect => {
                let tx = self.bisect(output_index, challenger, role).await?;
                tracing::info!(target: "challenger", "Bisected challenge against output {} in tx {:?}", output_index, tx);
            }
            Action::ProveFault {
                skip_fault_position_selection,
            } => match self
                .prove_fault(output_index, challenger, skip_fault_position_selection)
                .await?
            {
                ProveOutcome::Submitted(tx) => {
                    tracing::info!(target: "challenger", "Proved fault of output {} in tx {:?}", output_index, tx);
                }
                ProveOutcome::Retry => return Ok(Tick::Pending),
            },
            Action::ClaimChallengerTimeout => {
                let tx = self.challenger_timeout(output_index, challenger).await?;
                tracing::info!(target: "challenger", "Claimed challenger timeout of output {} in tx {:?}", output_index, tx);
            }
            Action::Cancel => {
                let tx = self.cancel_challenge(output_index).await?;
                tracing::info!(target: "challenger", "Cancelled challenge against deleted output {} in tx {:?}", output_index, tx);
            }
        }

        Ok(Tick::Continue)
    }

    /// Plays the challenge keyed by `(output_index, challenger)` until it is resolved or this
    /// validator has nothing left to do in it.
    ///
    /// A proof that stays pending for more than `proof_poll_budget` consecutive polls ends the
    /// loop.
    pub async fn handle_challenge(&self, output_index: u64, asserter: Address, challenger: Address) {
        tracing::info!(target: "challenger", "Handling challenge against output {} (asserter {:?}, challenger {:?})", output_index, asserter, challenger);
        let mut interval = tokio::time::interval(self.config.challenge_poll_interval);
        let mut pending_polls = 0;

        loop {
            interval.tick().await;
            match self
                .handle_challenge_tick(output_index, asserter, challenger)
                .await
            {
                Ok(Tick::Stop) => {
                    tracing::info!(target: "challenger", "Done handling challenge against output {}", output_index);
                    return;
                }
                Ok(Tick::Pending) => {
                    pending_polls += 1;
                    if pending_polls >= self.config.proof_poll_budget {
                        tracing::error!(
                            target: "challenger",
                            "Giving up on challenge against output {}: {}",
                            output_index,
                            ProverError::PollBudgetExhausted(pending_polls)
                        );
                        return;
                    }
                }
                Ok(Tick::Continue) => pending_polls = 0,
                Err(e) => {
                    tracing::error!(target: "challenger", "Failed to handle challenge against output {}: {}", output_index, e);
                }
            }
        }
    }
}
