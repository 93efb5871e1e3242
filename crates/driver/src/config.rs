//! The `config` module contains the [ValidatorConfig] and the [ProofSystem] selection.

use ethers::types::{Address, H256};
use op_validator_prover::{
    ProofFetcher, ProverError, RpcClient, TraceProofFetcher, WitnessGenerator,
    WitnessProofFetcher, ZkVmProver,
};
use std::{sync::Arc, time::Duration};

/// The [ValidatorConfig] struct is the configuration shared by the orchestrators and the
/// [Driver](crate::Driver) implementations. It is built once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// The address of this validator. Transactions are signed on its behalf.
    pub validator: Address,
    /// The address of the Colosseum contract.
    pub colosseum: Address,
    /// The address of the L2OutputOracle contract.
    pub l2_output_oracle: Address,
    /// The address of the ValidatorPool contract.
    pub validator_pool: Address,
    /// The address of the ValidatorManager contract.
    pub validator_manager: Address,
    /// The address of the SecurityCouncil contract. Required by guardians only.
    pub security_council: Option<Address>,
    /// How often the output monitor polls the L2OutputOracle.
    pub output_poll_interval: Duration,
    /// How often an in-progress challenge is re-read.
    pub challenge_poll_interval: Duration,
    /// How often the guardian retries a pending council transaction.
    pub guardian_poll_interval: Duration,
    /// The timeout of a single network call.
    pub network_timeout: Duration,
    /// How long to wait for a transaction receipt.
    pub receipt_timeout: Duration,
    /// The number of polls spent on a proof before the attempt is given up.
    pub proof_poll_budget: usize,
    /// Whether this validator creates and plays challenges.
    pub challenger_enabled: bool,
    /// Whether this validator acts as a security council guardian.
    pub guardian_enabled: bool,
    /// Whether this validator submits outputs.
    pub submitter_enabled: bool,
    /// How long the output submitter waits before retrying a failed or blocked submission.
    pub submitter_retry_interval: Duration,
    /// The number of L2 blocks before each round at which submission attempts start.
    pub submitter_round_buffer: u64,
    /// Whether the output submitter joins public rounds.
    pub allow_public_round: bool,
    /// Whether outputs may be submitted for L2 blocks derived from non-finalized L1 blocks.
    pub allow_non_finalized: bool,
    /// The L1 block time in seconds.
    pub l1_block_time: u64,
    /// The proof system used to prove faults. Challengers cannot prove without one.
    pub proof_system: Option<ProofSystem>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            validator: Address::zero(),
            colosseum: Address::zero(),
            l2_output_oracle: Address::zero(),
            validator_pool: Address::zero(),
            validator_manager: Address::zero(),
            security_council: None,
            output_poll_interval: Duration::from_secs(12),
            challenge_poll_interval: Duration::from_secs(12),
            guardian_poll_interval: Duration::from_secs(60),
            network_timeout: Duration::from_secs(10),
            receipt_timeout: Duration::from_secs(120),
            proof_poll_budget: 720,
            challenger_enabled: false,
            guardian_enabled: false,
            submitter_enabled: false,
            submitter_retry_interval: Duration::from_secs(1),
            submitter_round_buffer: 30,
            allow_public_round: false,
            allow_non_finalized: false,
            l1_block_time: 12,
            proof_system: None,
        }
    }
}

impl ValidatorConfig {
    /// Returns the number of whole L1 blocks within `seconds`.
    pub fn l1_blocks_in(&self, seconds: u64) -> u64 {
        seconds / self.l1_block_time.max(1)
    }
}

/// The [ProofSystem] enum selects the proving backend at configuration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofSystem {
    /// A trace prover reached with a single `prove` call.
    Trace {
        /// The prover endpoint.
        url: String,
        /// The timeout of a single request. Proving a trace is slow.
        timeout: Duration,
    },
    /// A witness generator feeding a zkVM prover.
    Witness {
        /// The zkVM prover endpoint.
        prover_url: String,
        /// The witness generator endpoint.
        witness_url: String,
        /// The timeout of a single request.
        timeout: Duration,
        /// The program verification key hash the Colosseum expects.
        expected_vkey_hash: H256,
    },
}

impl ProofSystem {
    /// Builds the [ProofFetcher] for this proof system. In witness mode the backends are asked for
    /// their spec first, and an incompatible pair is rejected.
    pub async fn build(&self) -> Result<Arc<dyn ProofFetcher>, ProverError> {
        match self {
            Self::Trace { url, timeout } => {
                let fetcher = TraceProofFetcher::new(RpcClient::try_new(url, *timeout)?);
                Ok(Arc::new(fetcher))
            }
            Self::Witness {
                prover_url,
                witness_url,
                timeout,
                expected_vkey_hash,
            } => {
                let fetcher = WitnessProofFetcher::new(
                    WitnessGenerator::new(RpcClient::try_new(witness_url, *timeout)?),
                    ZkVmProver::new(RpcClient::try_new(prover_url, *timeout)?),
                    *expected_vkey_hash,
                );
                fetcher.check_spec().await?;
                Ok(Arc::new(fetcher))
            }
        }
    }
}
