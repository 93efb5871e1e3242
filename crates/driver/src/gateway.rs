//! The `gateway` module contains the [LedgerGateway] trait, the validator's view of the on-chain
//! challenge and bond state, and [ContractGateway], its implementation over the L1 contracts.
//!
//! Submissions are send-and-await-receipt: a submission succeeds only when its receipt reports
//! success. The ledger is the sole arbiter of turn validity, so a submission built on a stale
//! status simply reverts.

use crate::{
    bindings::{
        Challenge, Colosseum, L2OutputOracle, SecurityCouncil, ValidatorManager, ValidatorPool,
        ZkEvmProof, ZkVmProof,
    },
    BlockId, ChallengeCreated, ChallengeInfo, DeletionRequested, FaultSubmission, L2Output,
    OutputProposal, SignerMiddlewareWS, ValidationRequested, ValidatorConfig,
};
use anyhow::{anyhow, bail, ensure, Context, Result};
use async_trait::async_trait;
use ethers::{
    abi::Detokenize,
    prelude::ContractCall,
    providers::Middleware,
    types::{Address, H256, U256},
};
use op_validator_solvers::challenge::{ChallengeStatus, Segments};
use std::{future::Future, sync::Arc, time::Duration};

/// The [LedgerGateway] trait is everything the validator reads from and submits to the ledger.
/// The ledger owns challenges and bonds; nothing read here is cached by the caller.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Returns the index the next submitted output will get.
    async fn next_output_index(&self) -> Result<u64>;

    /// Returns the number of L2 blocks between two outputs.
    async fn submission_interval(&self) -> Result<u64>;

    /// Returns the L2 block time in seconds.
    async fn l2_block_time(&self) -> Result<u64>;

    /// Returns the finalization period of outputs in seconds.
    async fn finalization_period_seconds(&self) -> Result<u64>;

    /// Returns the challenge creation period of outputs in seconds.
    async fn creation_period_seconds(&self) -> Result<u64>;

    /// Returns the output at `output_index`.
    async fn get_l2_output(&self, output_index: u64) -> Result<L2Output>;

    /// Returns the L2 block number the next output must commit to.
    async fn next_block_number(&self) -> Result<u64>;

    /// Returns the validator selected for the current priority round. The public round address
    /// means any validator may submit.
    async fn next_validator(&self) -> Result<Address>;

    /// Returns the index of the first output committing to a block at or after `l2_block_number`.
    async fn get_l2_output_index_after(&self, l2_block_number: u64) -> Result<u64>;

    /// Returns true if the output can no longer be disputed.
    async fn is_output_finalized(&self, output_index: u64) -> Result<bool>;

    /// Returns true if a challenge against the output may still be created.
    async fn is_in_creation_period(&self, output_index: u64) -> Result<bool>;

    /// Returns the status of the challenge keyed by `(output_index, challenger)`.
    async fn challenge_status(&self, output_index: u64, challenger: Address)
        -> Result<ChallengeStatus>;

    /// Returns the challenge keyed by `(output_index, challenger)`.
    async fn get_challenge(&self, output_index: u64, challenger: Address) -> Result<ChallengeInfo>;

    /// Returns the number of checkpoint hashes submitted at `turn` (1-based).
    async fn segments_length(&self, turn: u8) -> Result<u64>;

    /// Returns the bond balance of `validator` that is not locked in a challenge.
    async fn unbonded_deposit(&self, validator: Address) -> Result<U256>;

    /// Returns the bond a challenger must lock to create a challenge.
    async fn required_bond_amount(&self) -> Result<U256>;

    /// Returns true if `validator` is jailed.
    async fn is_in_jail(&self, validator: Address) -> Result<bool>;

    /// Returns the latest L1 block number.
    async fn latest_l1_block(&self) -> Result<u64>;

    /// Returns the `ChallengeCreated` events emitted within `[from, to]`.
    async fn challenge_created_events(&self, from: u64, to: u64) -> Result<Vec<ChallengeCreated>>;

    /// Returns true if a challenge against `output_index` reached `ReadyToProve` within
    /// `[from, to]`.
    async fn ready_to_prove_emitted(&self, output_index: u64, from: u64, to: u64) -> Result<bool>;

    /// Returns the `ValidationRequested` events emitted within `[from, to]`.
    async fn validation_requested_events(&self, from: u64, to: u64)
        -> Result<Vec<ValidationRequested>>;

    /// Returns the `DeletionRequested` events emitted within `[from, to]`.
    async fn deletion_requested_events(&self, from: u64, to: u64) -> Result<Vec<DeletionRequested>>;

    /// Returns true if the validator already confirmed the council transaction.
    async fn is_transaction_confirmed(&self, transaction_id: U256) -> Result<bool>;

    /// Returns true if the council transaction has been executed.
    async fn is_transaction_executed(&self, transaction_id: U256) -> Result<bool>;

    /// Creates a challenge against `output_index`, locking the challenger's bond.
    async fn create_challenge(
        &self,
        output_index: u64,
        l1_origin: BlockId,
        segments: Vec<H256>,
    ) -> Result<H256>;

    /// Selects the child at `position` and submits the checkpoints of that child.
    async fn bisect(
        &self,
        output_index: u64,
        challenger: Address,
        position: u64,
        segments: Vec<H256>,
    ) -> Result<H256>;

    /// Submits a proof for the transition at `position` of the final segment.
    async fn prove_fault(
        &self,
        output_index: u64,
        position: u64,
        proof: FaultSubmission,
    ) -> Result<H256>;

    /// Claims the challenger's timeout.
    async fn challenger_timeout(&self, output_index: u64, challenger: Address) -> Result<H256>;

    /// Cancels the caller's own challenge.
    async fn cancel_challenge(&self, output_index: u64) -> Result<H256>;

    /// Confirms a pending security council transaction.
    async fn confirm_transaction(&self, transaction_id: U256) -> Result<H256>;

    /// Asks the security council to delete an output.
    async fn request_deletion(&self, output_index: u64) -> Result<H256>;

    /// Submits an output to the L2OutputOracle, bonding the submitter's deposit.
    async fn submit_l2_output(&self, output: OutputProposal) -> Result<H256>;
}

/// The [ContractGateway] is the [LedgerGateway] over the L1 contracts. Views are bounded by the
/// network timeout; submissions wait for their receipt up to the receipt timeout.
pub struct ContractGateway {
    provider: Arc<SignerMiddlewareWS>,
    colosseum: Colosseum<SignerMiddlewareWS>,
    l2oo: L2OutputOracle<SignerMiddlewareWS>,
    pool: ValidatorPool<SignerMiddlewareWS>,
    manager: ValidatorManager<SignerMiddlewareWS>,
    council: Option<SecurityCouncil<SignerMiddlewareWS>>,
    network_timeout: Duration,
    receipt_timeout: Duration,
}

impl ContractGateway {
    /// Creates a new [ContractGateway] for the contracts named in `config`.
    pub fn new(provider: Arc<SignerMiddlewareWS>, config: &ValidatorConfig) -> Self {
        Self {
            colosseum: Colosseum::new(config.colosseum, Arc::clone(&provider)),
            l2oo: L2OutputOracle::new(config.l2_output_oracle, Arc::clone(&provider)),
            pool: ValidatorPool::new(config.validator_pool, Arc::clone(&provider)),
            manager: ValidatorManager::new(config.validator_manager, Arc::clone(&provider)),
            council: config
                .security_council
                .map(|addr| SecurityCouncil::new(addr, Arc::clone(&provider))),
            provider,
            network_timeout: config.network_timeout,
            receipt_timeout: config.receipt_timeout,
        }
    }

    fn council(&self) -> Result<&SecurityCouncil<SignerMiddlewareWS>> {
        self.council
            .as_ref()
            .ok_or(anyhow!("SecurityCouncil address is not configured"))
    }

    /// Awaits a read-only call, bounded by the network timeout.
    async fn view<T, E>(&self, what: &str, call: impl Future<Output = Result<T, E>>) -> Result<T>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        tokio::time::timeout(self.network_timeout, call)
            .await
            .map_err(|_| anyhow!("{} timed out after {:?}", what, self.network_timeout))?
            .with_context(|| format!("failed to {}", what))
    }

    /// Sends a transaction and waits for a successful receipt.
    async fn submit<D: Detokenize>(
        &self,
        what: &str,
        call: ContractCall<SignerMiddlewareWS, D>,
    ) -> Result<H256> {
        let pending = tokio::time::timeout(self.network_timeout, call.send())
            .await
            .map_err(|_| anyhow!("sending {} tx timed out", what))?
            .with_context(|| format!("failed to send {} tx", what))?;
        let tx_hash = *pending;
        tracing::info!(target: "ledger", "Sent {} tx {:?}, awaiting receipt...", what, tx_hash);

        let receipt = tokio::time::timeout(self.receipt_timeout, pending)
            .await
            .map_err(|_| anyhow!("{} tx {:?} not mined within {:?}", what, tx_hash, self.receipt_timeout))?
            .with_context(|| format!("failed to fetch receipt of {} tx {:?}", what, tx_hash))?
            .ok_or(anyhow!("{} tx {:?} was dropped", what, tx_hash))?;

        ensure!(
            receipt.status == Some(1u64.into()),
            "{} tx {:?} reverted",
            what,
            tx_hash
        );
        tracing::info!(target: "ledger", "{} tx {:?} succeeded in block {:?}", what, tx_hash, receipt.block_number);
        Ok(tx_hash)
    }
}

fn output_index_topic(output_index: u64) -> H256 {
    let mut topic = [0u8; 32];
    U256::from(output_index).to_big_endian(&mut topic);
    H256::from(topic)
}

/// Narrows a contract integer to `u64`, failing instead of truncating.
fn to_u64(value: U256, what: &str) -> Result<u64> {
    if value > U256::from(u64::MAX) {
        bail!("{} {} does not fit in 64 bits", what, value);
    }
    Ok(value.as_u64())
}

/// The ABI tuple returned by `L2OutputOracle.getL2Output`.
type CheckpointOutputTuple = ([u8; 32], Address, u128, u128);

/// The ABI tuple returned by `Colosseum.getChallenge`.
type ChallengeTuple = (u8, u64, Address, Address, Vec<[u8; 32]>, U256, U256, [u8; 32]);

fn l2_output_from_tuple(raw: CheckpointOutputTuple) -> Result<L2Output> {
    let (output_root, submitter, timestamp, l2_block_number) = raw;
    Ok(L2Output {
        output_root: H256::from(output_root),
        submitter,
        timestamp: u64::try_from(timestamp).context("output timestamp does not fit in 64 bits")?,
        l2_block_number: u64::try_from(l2_block_number)
            .context("output block number does not fit in 64 bits")?,
    })
}

impl From<ChallengeTuple> for Challenge {
    fn from(raw: ChallengeTuple) -> Self {
        let (turn, timeout_at, asserter, challenger, segments, seg_size, seg_start, l_1_head) = raw;
        Self {
            turn,
            timeout_at,
            asserter,
            challenger,
            segments,
            seg_size,
            seg_start,
            l_1_head,
        }
    }
}

impl TryFrom<Challenge> for ChallengeInfo {
    type Error = anyhow::Error;

    fn try_from(challenge: Challenge) -> Result<Self> {
        let segments = Segments::try_new(
            to_u64(challenge.seg_start, "segment start")?,
            to_u64(challenge.seg_size, "segment size")?,
            challenge.segments.into_iter().map(H256::from).collect(),
        )?;
        Ok(Self {
            turn: challenge.turn,
            timeout_at: challenge.timeout_at,
            asserter: challenge.asserter,
            challenger: challenge.challenger,
            segments,
            l1_head: H256::from(challenge.l_1_head),
        })
    }
}

#[async_trait]
impl LedgerGateway for ContractGateway {
    async fn next_output_index(&self) -> Result<u64> {
        let index = self
            .view("get next output index", self.l2oo.next_output_index().call())
            .await?;
        to_u64(index, "next output index")
    }

    async fn submission_interval(&self) -> Result<u64> {
        let interval = self
            .view("get submission interval", self.l2oo.submission_interval().call())
            .await?;
        to_u64(interval, "submission interval")
    }

    async fn l2_block_time(&self) -> Result<u64> {
        let time = self
            .view("get l2 block time", self.l2oo.l2_block_time().call())
            .await?;
        to_u64(time, "L2 block time")
    }

    async fn finalization_period_seconds(&self) -> Result<u64> {
        let period = self
            .view(
                "get finalization period",
                self.l2oo.finalization_period_seconds().call(),
            )
            .await?;
        to_u64(period, "finalization period")
    }

    async fn creation_period_seconds(&self) -> Result<u64> {
        let period = self
            .view(
                "get creation period",
                self.colosseum.creation_period_seconds().call(),
            )
            .await?;
        to_u64(period, "creation period")
    }

    async fn get_l2_output(&self, output_index: u64) -> Result<L2Output> {
        let output = self
            .view(
                "get l2 output",
                self.l2oo.get_l2_output(U256::from(output_index)).call(),
            )
            .await?;
        l2_output_from_tuple(output)
    }

    async fn next_block_number(&self) -> Result<u64> {
        let number = self
            .view("get next block number", self.l2oo.next_block_number().call())
            .await?;
        to_u64(number, "next block number")
    }

    async fn next_validator(&self) -> Result<Address> {
        self.view("get next validator", self.pool.next_validator().call())
            .await
    }

    async fn get_l2_output_index_after(&self, l2_block_number: u64) -> Result<u64> {
        let index = self
            .view(
                "get l2 output index after",
                self.l2oo
                    .get_l2_output_index_after(U256::from(l2_block_number))
                    .call(),
            )
            .await?;
        to_u64(index, "output index")
    }

    async fn is_output_finalized(&self, output_index: u64) -> Result<bool> {
        self.view(
            "check output finalization",
            self.l2oo.is_finalized(U256::from(output_index)).call(),
        )
        .await
    }

    async fn is_in_creation_period(&self, output_index: u64) -> Result<bool> {
        self.view(
            "check creation period",
            self.colosseum
                .is_in_creation_period(U256::from(output_index))
                .call(),
        )
        .await
    }

    async fn challenge_status(
        &self,
        output_index: u64,
        challenger: Address,
    ) -> Result<ChallengeStatus> {
        let raw = self
            .view(
                "get challenge status",
                self.colosseum
                    .get_status(U256::from(output_index), challenger)
                    .call(),
            )
            .await?;
        ChallengeStatus::try_from(raw)
    }

    async fn get_challenge(&self, output_index: u64, challenger: Address) -> Result<ChallengeInfo> {
        let challenge = self
            .view(
                "get challenge",
                self.colosseum
                    .get_challenge(U256::from(output_index), challenger)
                    .call(),
            )
            .await?;
        Challenge::from(challenge).try_into()
    }

    async fn segments_length(&self, turn: u8) -> Result<u64> {
        ensure!(turn > 0, "turns start at 1");
        let length = self
            .view(
                "get segments length",
                self.colosseum
                    .segments_lengths(U256::from(turn - 1))
                    .call(),
            )
            .await?;
        to_u64(length, "segments length")
    }

    async fn unbonded_deposit(&self, validator: Address) -> Result<U256> {
        self.view("get deposit", self.pool.balance_of(validator).call())
            .await
    }

    async fn required_bond_amount(&self) -> Result<U256> {
        self.view(
            "get required bond amount",
            self.pool.required_bond_amount().call(),
        )
        .await
    }

    async fn is_in_jail(&self, validator: Address) -> Result<bool> {
        self.view("check jail status", self.manager.in_jail(validator).call())
            .await
    }

    async fn latest_l1_block(&self) -> Result<u64> {
        let number = self
            .view("get latest L1 block", self.provider.get_block_number())
            .await?;
        Ok(number.as_u64())
    }

    async fn challenge_created_events(&self, from: u64, to: u64) -> Result<Vec<ChallengeCreated>> {
        let filter = self
            .colosseum
            .challenge_created_filter()
            .from_block(from)
            .to_block(to);
        let events = self
            .view("query ChallengeCreated events", filter.query())
            .await?;
        events
            .into_iter()
            .map(|ev| {
                Ok(ChallengeCreated {
                    output_index: to_u64(ev.output_index, "output index")?,
                    asserter: ev.asserter,
                    challenger: ev.challenger,
                })
            })
            .collect()
    }

    async fn ready_to_prove_emitted(&self, output_index: u64, from: u64, to: u64) -> Result<bool> {
        let filter = self
            .colosseum
            .ready_to_prove_filter()
            .from_block(from)
            .to_block(to)
            .topic1(output_index_topic(output_index));
        let events = self
            .view("query ReadyToProve events", filter.query())
            .await?;
        Ok(!events.is_empty())
    }

    async fn validation_requested_events(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<ValidationRequested>> {
        let filter = self
            .council()?
            .validation_requested_filter()
            .from_block(from)
            .to_block(to);
        let events = self
            .view("query ValidationRequested events", filter.query())
            .await?;
        events
            .into_iter()
            .map(|ev| {
                Ok(ValidationRequested {
                    transaction_id: ev.transaction_id,
                    output_root: H256::from(ev.output_root),
                    l2_block_number: to_u64(ev.l_2_block_number, "L2 block number")?,
                })
            })
            .collect()
    }

    async fn deletion_requested_events(&self, from: u64, to: u64) -> Result<Vec<DeletionRequested>> {
        let filter = self
            .council()?
            .deletion_requested_filter()
            .from_block(from)
            .to_block(to);
        let events = self
            .view("query DeletionRequested events", filter.query())
            .await?;
        events
            .into_iter()
            .map(|ev| {
                Ok(DeletionRequested {
                    transaction_id: ev.transaction_id,
                    output_index: to_u64(ev.output_index, "output index")?,
                })
            })
            .collect()
    }

    async fn is_transaction_confirmed(&self, transaction_id: U256) -> Result<bool> {
        self.view(
            "check council confirmation",
            self.council()?.is_confirmed(transaction_id).call(),
        )
        .await
    }

    async fn is_transaction_executed(&self, transaction_id: U256) -> Result<bool> {
        let (_, _, _, executed) = self
            .view(
                "get council transaction",
                self.council()?.transactions(transaction_id).call(),
            )
            .await?;
        Ok(executed)
    }

    async fn create_challenge(
        &self,
        output_index: u64,
        l1_origin: BlockId,
        segments: Vec<H256>,
    ) -> Result<H256> {
        let call = self.colosseum.create_challenge(
            U256::from(output_index),
            l1_origin.hash.0,
            U256::from(l1_origin.number),
            segments.into_iter().map(|h| h.0).collect(),
        );
        self.submit("createChallenge", call).await
    }

    async fn bisect(
        &self,
        output_index: u64,
        challenger: Address,
        position: u64,
        segments: Vec<H256>,
    ) -> Result<H256> {
        let call = self.colosseum.bisect(
            U256::from(output_index),
            challenger,
            U256::from(position),
            segments.into_iter().map(|h| h.0).collect(),
        );
        self.submit("bisect", call).await
    }

    async fn prove_fault(
        &self,
        output_index: u64,
        position: u64,
        proof: FaultSubmission,
    ) -> Result<H256> {
        let (index, pos) = (U256::from(output_index), U256::from(position));
        match proof {
            FaultSubmission::ZkEvm {
                public_input_proof,
                proof,
                pair,
            } => {
                let call = self.colosseum.prove_fault_with_zk_evm(
                    index,
                    pos,
                    ZkEvmProof {
                        public_input_proof,
                        proof,
                        pair,
                    },
                );
                self.submit("proveFaultWithZkEvm", call).await
            }
            FaultSubmission::ZkVm {
                vkey_hash,
                public_values,
                proof,
            } => {
                let call = self.colosseum.prove_fault_with_zk_vm(
                    index,
                    pos,
                    ZkVmProof {
                        vkey: vkey_hash.0,
                        public_values,
                        proof,
                    },
                );
                self.submit("proveFaultWithZkVm", call).await
            }
        }
    }

    async fn challenger_timeout(&self, output_index: u64, challenger: Address) -> Result<H256> {
        let call = self
            .colosseum
            .challenger_timeout(U256::from(output_index), challenger);
        self.submit("challengerTimeout", call).await
    }

    async fn cancel_challenge(&self, output_index: u64) -> Result<H256> {
        let call = self.colosseum.cancel_challenge(U256::from(output_index));
        self.submit("cancelChallenge", call).await
    }

    async fn confirm_transaction(&self, transaction_id: U256) -> Result<H256> {
        let call = self.council()?.confirm_transaction(transaction_id);
        self.submit("confirmTransaction", call).await
    }

    async fn request_deletion(&self, output_index: u64) -> Result<H256> {
        let call = self
            .council()?
            .request_deletion(U256::from(output_index), false);
        self.submit("requestDeletion", call).await
    }

    async fn submit_l2_output(&self, output: OutputProposal) -> Result<H256> {
        let call = self.l2oo.submit_l2_output(
            output.output_root.0,
            U256::from(output.l2_block_number),
            output.current_l1.hash.0,
            U256::from(output.current_l1.number),
        );
        // Bond unlocking and priority validator selection make the gas usage vary between blocks.
        let gas = self
            .view("estimate submitL2Output gas", call.estimate_gas())
            .await?;
        self.submit("submitL2Output", call.gas(gas * 3 / 2)).await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn output_index_topic_is_left_padded() {
        let topic = output_index_topic(0x0102);
        assert_eq!(topic.as_bytes()[30..], [0x01, 0x02]);
        assert!(topic.as_bytes()[..30].iter().all(|b| *b == 0));
    }

    #[test]
    fn challenge_tuple_converts_with_geometry_checks() {
        let raw: ChallengeTuple = (
            2,
            1_700_000_000,
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            vec![[1u8; 32], [2u8; 32], [3u8; 32]],
            U256::from(8),
            U256::from(16),
            [9u8; 32],
        );
        let info = ChallengeInfo::try_from(Challenge::from(raw.clone())).unwrap();
        assert_eq!(info.turn, 2);
        assert_eq!(info.challenger, Address::repeat_byte(2));
        assert_eq!(info.segments.degree, 4);
        assert_eq!(info.segments.start, 16);
        assert_eq!(info.l1_head, H256::repeat_byte(9));

        let mut broken = raw.clone();
        broken.5 = U256::from(7);
        assert!(ChallengeInfo::try_from(Challenge::from(broken)).is_err());

        let mut overflowing = raw;
        overflowing.6 = U256::from(u64::MAX) + 1;
        assert!(ChallengeInfo::try_from(Challenge::from(overflowing)).is_err());
    }

    #[test]
    fn output_tuple_rejects_oversized_numbers() {
        let output = l2_output_from_tuple(([7u8; 32], Address::repeat_byte(3), 1_700_000_000, 1800)).unwrap();
        assert_eq!(output.output_root, H256::repeat_byte(7));
        assert_eq!(output.submitter, Address::repeat_byte(3));
        assert_eq!(output.l2_block_number, 1800);

        assert!(l2_output_from_tuple(([7u8; 32], Address::zero(), 0, u64::MAX as u128 + 1)).is_err());
    }

    #[test]
    fn contract_integers_are_not_truncated() {
        assert_eq!(to_u64(U256::from(u64::MAX), "value").unwrap(), u64::MAX);
        assert!(to_u64(U256::from(u64::MAX) + 1, "value").is_err());
    }
}
