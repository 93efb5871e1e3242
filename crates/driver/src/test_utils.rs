//! In-memory [LedgerGateway], [RollupSource] and [ProofFetcher] implementations for the
//! orchestrator tests.

use crate::{
    BlockId, ChallengeCreated, ChallengeInfo, DeletionRequested, FaultSubmission, L2Output,
    LedgerGateway, LocalOutput, OutputProposal, RollupSource, SyncStatus, ValidationRequested, ValidatorConfig,
};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use op_validator_prover::{
    ProofFetcher, ProofJob, ProofPoll, ProofSystemKind, ProverError, RequestStatus,
};
use op_validator_solvers::challenge::{ChallengeStatus, Segments};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

pub const VALIDATOR: Address = Address::repeat_byte(0xaa);
pub const OTHER: Address = Address::repeat_byte(0xbb);
pub const SUBMISSION_INTERVAL: u64 = 1800;

/// The root the trusted node reports at `block`.
pub fn local_root(block: u64) -> H256 {
    H256::from_low_u64_be(block + 1)
}

/// A root that differs from [local_root] at `block`.
pub fn bad_root(block: u64) -> H256 {
    H256::from_low_u64_be((block + 1) | (1 << 63))
}

pub fn test_config() -> ValidatorConfig {
    ValidatorConfig {
        validator: VALIDATOR,
        challenger_enabled: true,
        guardian_enabled: true,
        security_council: Some(Address::repeat_byte(0xcc)),
        output_poll_interval: Duration::from_millis(10),
        challenge_poll_interval: Duration::from_millis(10),
        guardian_poll_interval: Duration::from_millis(10),
        proof_poll_budget: 3,
        submitter_enabled: true,
        submitter_retry_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

/// A ledger submission recorded by the [MockLedger].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    CreateChallenge {
        output_index: u64,
        l1_origin: BlockId,
        segments: Vec<H256>,
    },
    Bisect {
        output_index: u64,
        challenger: Address,
        position: u64,
        segments: Vec<H256>,
    },
    ProveFault {
        output_index: u64,
        position: u64,
        proof: FaultSubmission,
    },
    ChallengerTimeout {
        output_index: u64,
        challenger: Address,
    },
    CancelChallenge {
        output_index: u64,
    },
    ConfirmTransaction(U256),
    RequestDeletion(u64),
    SubmitL2Output(OutputProposal),
}

#[derive(Debug)]
pub struct LedgerState {
    pub next_output_index: u64,
    pub next_block_number: u64,
    pub next_validator: Address,
    pub outputs: HashMap<u64, L2Output>,
    pub finalized: HashSet<u64>,
    pub creation_open: HashSet<u64>,
    pub statuses: HashMap<(u64, Address), ChallengeStatus>,
    pub challenges: HashMap<(u64, Address), ChallengeInfo>,
    /// Checkpoint counts per turn, starting at turn 1.
    pub segments_lengths: Vec<u64>,
    pub deposits: HashMap<Address, U256>,
    pub required_bond: U256,
    pub jailed: HashSet<Address>,
    pub latest_l1_block: u64,
    pub challenge_created: Vec<ChallengeCreated>,
    pub ready_to_prove: HashSet<u64>,
    pub validation_requests: Vec<ValidationRequested>,
    pub deletion_requests: Vec<DeletionRequested>,
    pub confirmed: HashSet<U256>,
    pub executed: HashSet<U256>,
    pub revert_submissions: bool,
}

impl Default for LedgerState {
    fn default() -> Self {
        Self {
            next_output_index: 0,
            next_block_number: SUBMISSION_INTERVAL,
            next_validator: VALIDATOR,
            outputs: HashMap::new(),
            finalized: HashSet::new(),
            creation_open: HashSet::new(),
            statuses: HashMap::new(),
            challenges: HashMap::new(),
            segments_lengths: vec![9, 6, 10, 6],
            deposits: HashMap::from([(VALIDATOR, U256::from(200))]),
            required_bond: U256::from(200),
            jailed: HashSet::new(),
            latest_l1_block: 1_000,
            challenge_created: Vec::new(),
            ready_to_prove: HashSet::new(),
            validation_requests: Vec::new(),
            deletion_requests: Vec::new(),
            confirmed: HashSet::new(),
            executed: HashSet::new(),
            revert_submissions: false,
        }
    }
}

/// An in-memory ledger. Submissions are recorded, never applied; tests advance the state by hand.
#[derive(Debug, Default)]
pub struct MockLedger {
    pub state: Mutex<LedgerState>,
    pub submissions: Mutex<Vec<Submission>>,
}

impl MockLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records an output at `index` committing to block `index * SUBMISSION_INTERVAL`.
    pub fn with_output(&self, index: u64, output_root: H256, submitter: Address) {
        let mut state = self.state.lock().unwrap();
        state.outputs.insert(
            index,
            L2Output {
                output_root,
                submitter,
                timestamp: 1_700_000_000 + index,
                l2_block_number: index * SUBMISSION_INTERVAL,
            },
        );
        state.next_output_index = state.next_output_index.max(index + 1);
    }

    pub fn set_status(&self, index: u64, challenger: Address, status: ChallengeStatus) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert((index, challenger), status);
    }

    pub fn set_challenge(&self, index: u64, challenge: ChallengeInfo) {
        self.state
            .lock()
            .unwrap()
            .challenges
            .insert((index, challenge.challenger), challenge);
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }

    fn submit(&self, submission: Submission) -> Result<H256> {
        if self.state.lock().unwrap().revert_submissions {
            bail!("transaction reverted");
        }
        let mut submissions = self.submissions.lock().unwrap();
        submissions.push(submission);
        Ok(H256::from_low_u64_be(submissions.len() as u64))
    }

    fn output(&self, index: u64) -> Result<L2Output> {
        self.state
            .lock()
            .unwrap()
            .outputs
            .get(&index)
            .copied()
            .ok_or(anyhow!("output {} not found", index))
    }
}

#[async_trait]
impl LedgerGateway for MockLedger {
    async fn next_output_index(&self) -> Result<u64> {
        Ok(self.state.lock().unwrap().next_output_index)
    }

    async fn submission_interval(&self) -> Result<u64> {
        Ok(SUBMISSION_INTERVAL)
    }

    async fn l2_block_time(&self) -> Result<u64> {
        Ok(2)
    }

    async fn finalization_period_seconds(&self) -> Result<u64> {
        Ok(600)
    }

    async fn creation_period_seconds(&self) -> Result<u64> {
        Ok(360)
    }

    async fn get_l2_output(&self, output_index: u64) -> Result<L2Output> {
        self.output(output_index)
    }

    async fn next_block_number(&self) -> Result<u64> {
        Ok(self.state.lock().unwrap().next_block_number)
    }

    async fn next_validator(&self) -> Result<Address> {
        Ok(self.state.lock().unwrap().next_validator)
    }

    async fn get_l2_output_index_after(&self, l2_block_number: u64) -> Result<u64> {
        Ok(l2_block_number.div_ceil(SUBMISSION_INTERVAL))
    }

    async fn is_output_finalized(&self, output_index: u64) -> Result<bool> {
        Ok(self.state.lock().unwrap().finalized.contains(&output_index))
    }

    async fn is_in_creation_period(&self, output_index: u64) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .creation_open
            .contains(&output_index))
    }

    async fn challenge_status(
        &self,
        output_index: u64,
        challenger: Address,
    ) -> Result<ChallengeStatus> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .statuses
            .get(&(output_index, challenger))
            .copied()
            .unwrap_or(ChallengeStatus::None))
    }

    async fn get_challenge(&self, output_index: u64, challenger: Address) -> Result<ChallengeInfo> {
        self.state
            .lock()
            .unwrap()
            .challenges
            .get(&(output_index, challenger))
            .cloned()
            .ok_or(anyhow!("no challenge for output {}", output_index))
    }

    async fn segments_length(&self, turn: u8) -> Result<u64> {
        let state = self.state.lock().unwrap();
        state
            .segments_lengths
            .get(turn as usize - 1)
            .copied()
            .ok_or(anyhow!("no segments length for turn {}", turn))
    }

    async fn unbonded_deposit(&self, validator: Address) -> Result<U256> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .deposits
            .get(&validator)
            .copied()
            .unwrap_or_default())
    }

    async fn required_bond_amount(&self) -> Result<U256> {
        Ok(self.state.lock().unwrap().required_bond)
    }

    async fn is_in_jail(&self, validator: Address) -> Result<bool> {
        Ok(self.state.lock().unwrap().jailed.contains(&validator))
    }

    async fn latest_l1_block(&self) -> Result<u64> {
        Ok(self.state.lock().unwrap().latest_l1_block)
    }

    async fn challenge_created_events(&self, _: u64, _: u64) -> Result<Vec<ChallengeCreated>> {
        Ok(self.state.lock().unwrap().challenge_created.clone())
    }

    async fn ready_to_prove_emitted(&self, output_index: u64, _: u64, _: u64) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .ready_to_prove
            .contains(&output_index))
    }

    async fn validation_requested_events(
        &self,
        _: u64,
        _: u64,
    ) -> Result<Vec<ValidationRequested>> {
        Ok(self.state.lock().unwrap().validation_requests.clone())
    }

    async fn deletion_requested_events(&self, _: u64, _: u64) -> Result<Vec<DeletionRequested>> {
        Ok(self.state.lock().unwrap().deletion_requests.clone())
    }

    async fn is_transaction_confirmed(&self, transaction_id: U256) -> Result<bool> {
        Ok(self.state.lock().unwrap().confirmed.contains(&transaction_id))
    }

    async fn is_transaction_executed(&self, transaction_id: U256) -> Result<bool> {
        Ok(self.state.lock().unwrap().executed.contains(&transaction_id))
    }

    async fn create_challenge(
        &self,
        output_index: u64,
        l1_origin: BlockId,
        segments: Vec<H256>,
    ) -> Result<H256> {
        self.submit(Submission::CreateChallenge {
            output_index,
            l1_origin,
            segments,
        })
    }

    async fn bisect(
        &self,
        output_index: u64,
        challenger: Address,
        position: u64,
        segments: Vec<H256>,
    ) -> Result<H256> {
        self.submit(Submission::Bisect {
            output_index,
            challenger,
            position,
            segments,
        })
    }

    async fn prove_fault(
        &self,
        output_index: u64,
        position: u64,
        proof: FaultSubmission,
    ) -> Result<H256> {
        self.submit(Submission::ProveFault {
            output_index,
            position,
            proof,
        })
    }

    async fn challenger_timeout(&self, output_index: u64, challenger: Address) -> Result<H256> {
        self.submit(Submission::ChallengerTimeout {
            output_index,
            challenger,
        })
    }

    async fn cancel_challenge(&self, output_index: u64) -> Result<H256> {
        self.submit(Submission::CancelChallenge { output_index })
    }

    async fn confirm_transaction(&self, transaction_id: U256) -> Result<H256> {
        self.submit(Submission::ConfirmTransaction(transaction_id))
    }

    async fn request_deletion(&self, output_index: u64) -> Result<H256> {
        self.submit(Submission::RequestDeletion(output_index))
    }

    async fn submit_l2_output(&self, output: OutputProposal) -> Result<H256> {
        let tx = self.submit(Submission::SubmitL2Output(output))?;
        self.state.lock().unwrap().next_block_number += SUBMISSION_INTERVAL;
        Ok(tx)
    }
}

/// A trusted node whose output at block `n` is [local_root]`(n)`.
#[derive(Debug, Default)]
pub struct MockRollup {
    pub overrides: Mutex<HashMap<u64, H256>>,
    /// Replaces the default sync status when set.
    pub sync: Mutex<Option<SyncStatus>>,
    /// Makes output proposals report a block other than the one asked for.
    pub stale_proposals: Mutex<bool>,
}

impl MockRollup {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl RollupSource for MockRollup {
    async fn output_at_block(&self, block_number: u64) -> Result<LocalOutput> {
        let output_root = self
            .overrides
            .lock()
            .unwrap()
            .get(&block_number)
            .copied()
            .unwrap_or(local_root(block_number));
        Ok(LocalOutput {
            output_root,
            l1_origin: BlockId {
                hash: H256::repeat_byte(0x11),
                number: block_number / 6,
            },
        })
    }

    async fn output_proposal(&self, block_number: u64) -> Result<OutputProposal> {
        let reported = if *self.stale_proposals.lock().unwrap() {
            block_number - 1
        } else {
            block_number
        };
        Ok(OutputProposal {
            output_root: local_root(reported),
            l2_block_number: reported,
            current_l1: BlockId {
                hash: H256::repeat_byte(0x33),
                number: 1_000,
            },
        })
    }

    async fn block_hash(&self, block_number: u64) -> Result<H256> {
        Ok(H256::from_low_u64_be(block_number + 0x1000))
    }

    async fn block_trace(&self, block_number: u64) -> Result<String> {
        Ok(format!("{{\"number\":{}}}", block_number))
    }

    async fn public_input_proof(&self, block_number: u64) -> Result<Bytes> {
        Ok(Bytes::from(block_number.to_be_bytes().to_vec()))
    }

    async fn sync_status(&self) -> Result<SyncStatus> {
        Ok(self.sync.lock().unwrap().unwrap_or(SyncStatus {
            head_l1: 1_000,
            safe_l2: 10 * SUBMISSION_INTERVAL,
            finalized_l2: 5 * SUBMISSION_INTERVAL,
        }))
    }
}

/// A [ProofFetcher] replaying scripted poll outcomes and recording the jobs it was given.
#[derive(Debug)]
pub struct MockFetcher {
    pub kind: ProofSystemKind,
    pub polls: Mutex<VecDeque<Result<ProofPoll, ProverError>>>,
    pub jobs: Mutex<Vec<ProofJob>>,
}

impl MockFetcher {
    pub fn new(
        kind: ProofSystemKind,
        polls: impl IntoIterator<Item = Result<ProofPoll, ProverError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            polls: Mutex::new(polls.into_iter().collect()),
            jobs: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ProofFetcher for MockFetcher {
    fn kind(&self) -> ProofSystemKind {
        self.kind
    }

    async fn request(&self, job: &ProofJob) -> Result<RequestStatus, ProverError> {
        self.jobs.lock().unwrap().push(job.clone());
        Ok(RequestStatus::Processing)
    }

    async fn poll(&self, _: &ProofJob) -> Result<ProofPoll, ProverError> {
        self.polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(ProofPoll::Pending(RequestStatus::Processing)))
    }
}

/// A challenge against the output at `index` whose current segment spans `[start, start+size)`
/// with `hashes`.
pub fn challenge_at(
    challenger: Address,
    asserter: Address,
    turn: u8,
    start: u64,
    size: u64,
    hashes: Vec<H256>,
) -> ChallengeInfo {
    ChallengeInfo {
        turn,
        timeout_at: 1_700_000_600,
        asserter,
        challenger,
        segments: Segments::try_new(start, size, hashes).unwrap(),
        l1_head: H256::repeat_byte(0x22),
    }
}
