use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use ethers::{
    middleware::SignerMiddleware,
    providers::{Middleware, Provider, Ws},
    signers::{LocalWallet, Signer},
    types::{Address, H256},
};
use op_validator_driver::{
    ChallengeDriver, Challenger, ContractGateway, Driver, Guardian, GuardianDriver, LedgerGateway,
    NodeRollupSource, OutputMonitorDriver, OutputSubmitter, OutputSubmitterDriver, ProofSystem,
    RollupSource, ValidatorConfig,
};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinSet;
use tracing::Level;

/// The proving backend selected on the command line.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ProofSystemArg {
    /// A trace prover reached with a single `prove` call.
    Trace,
    /// A witness generator feeding a zkVM prover.
    Witness,
}

/// Arguments for the `op-validator` binary.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Verbosity level (0-4)
    #[arg(long, short, help = "Verbosity level (0-4)", action = ArgAction::Count, env = "VERBOSITY")]
    v: u8,

    /// The Websocket RPC endpoint used to index and send transactions.
    #[arg(
        long,
        short,
        help = "The Websocket RPC endpoint used to index and send transactions.",
        env = "OP_VALIDATOR_L1_WS"
    )]
    ws_endpoint: String,

    /// The HTTP RPC endpoint of the trusted rollup node.
    #[arg(long, help = "The HTTP RPC endpoint of the trusted rollup node.", env = "OP_VALIDATOR_ROLLUP_RPC")]
    rollup_rpc: String,

    /// The HTTP RPC endpoint of the L2 execution client.
    #[arg(long, help = "The HTTP RPC endpoint of the L2 execution client.", env = "OP_VALIDATOR_L2_RPC")]
    l2_rpc: String,

    /// The private key of the validator.
    #[arg(long, help = "The private key of the validator.", env = "OP_VALIDATOR_PRIVATE_KEY")]
    private_key: String,

    /// The address of the Colosseum contract.
    #[arg(long, help = "The address of the Colosseum contract.", env = "OP_VALIDATOR_COLOSSEUM")]
    colosseum: Address,

    /// The address of the L2OutputOracle contract.
    #[arg(long, help = "The address of the L2OutputOracle contract.", env = "OP_VALIDATOR_L2OO")]
    l2_output_oracle: Address,

    /// The address of the ValidatorPool contract.
    #[arg(long, help = "The address of the ValidatorPool contract.", env = "OP_VALIDATOR_POOL")]
    validator_pool: Address,

    /// The address of the ValidatorManager contract.
    #[arg(long, help = "The address of the ValidatorManager contract.", env = "OP_VALIDATOR_MANAGER")]
    validator_manager: Address,

    /// The address of the SecurityCouncil contract.
    #[arg(long, help = "The address of the SecurityCouncil contract.", env = "OP_VALIDATOR_SECURITY_COUNCIL")]
    security_council: Option<Address>,

    /// Create and play challenges against invalid outputs.
    #[arg(long, help = "Create and play challenges against invalid outputs.", env = "OP_VALIDATOR_CHALLENGER_ENABLED")]
    challenger_enabled: bool,

    /// Act as a security council guardian.
    #[arg(long, help = "Act as a security council guardian.", env = "OP_VALIDATOR_GUARDIAN_ENABLED")]
    guardian_enabled: bool,

    /// Submit outputs to the L2OutputOracle.
    #[arg(long, help = "Submit outputs to the L2OutputOracle.", env = "OP_VALIDATOR_OUTPUT_SUBMITTER_ENABLED")]
    output_submitter_enabled: bool,

    /// Milliseconds before a blocked or failed output submission is retried.
    #[arg(long, default_value_t = 1000, help = "Milliseconds before a blocked or failed output submission is retried.", env = "OP_VALIDATOR_OUTPUT_SUBMITTER_RETRY_INTERVAL")]
    output_submitter_retry_interval: u64,

    /// Number of L2 blocks before each round to start trying submission.
    #[arg(long, default_value_t = 30, help = "Number of L2 blocks before each round to start trying submission.", env = "OP_VALIDATOR_OUTPUT_SUBMITTER_ROUND_BUFFER")]
    output_submitter_round_buffer: u64,

    /// Join public rounds when submitting outputs.
    #[arg(long, help = "Join public rounds when submitting outputs.", env = "OP_VALIDATOR_OUTPUT_SUBMITTER_ALLOW_PUBLIC_ROUND")]
    output_submitter_allow_public_round: bool,

    /// Submit outputs for L2 blocks derived from non-finalized L1 blocks.
    #[arg(long, help = "Submit outputs for L2 blocks derived from non-finalized L1 blocks.", env = "OP_VALIDATOR_ALLOW_NON_FINALIZED")]
    allow_non_finalized: bool,

    /// Seconds between L2OutputOracle polls.
    #[arg(long, default_value_t = 12, help = "Seconds between L2OutputOracle polls.", env = "OP_VALIDATOR_OUTPUT_POLL_INTERVAL")]
    output_poll_interval: u64,

    /// Seconds between challenge status polls.
    #[arg(long, default_value_t = 12, help = "Seconds between challenge status polls.", env = "OP_VALIDATOR_CHALLENGE_POLL_INTERVAL")]
    challenge_poll_interval: u64,

    /// Seconds between guardian retries.
    #[arg(long, default_value_t = 60, help = "Seconds between guardian retries.", env = "OP_VALIDATOR_GUARDIAN_POLL_INTERVAL")]
    guardian_poll_interval: u64,

    /// Seconds before a single network call is abandoned.
    #[arg(long, default_value_t = 10, help = "Seconds before a single network call is abandoned.", env = "OP_VALIDATOR_NETWORK_TIMEOUT")]
    network_timeout: u64,

    /// Seconds to wait for a transaction receipt.
    #[arg(long, default_value_t = 120, help = "Seconds to wait for a transaction receipt.", env = "OP_VALIDATOR_RECEIPT_TIMEOUT")]
    receipt_timeout: u64,

    /// The L1 block time in seconds.
    #[arg(long, default_value_t = 12, help = "The L1 block time in seconds.", env = "OP_VALIDATOR_L1_BLOCK_TIME")]
    l1_block_time: u64,

    /// The proof system used to prove faults.
    #[arg(long, value_enum, help = "The proof system used to prove faults.", env = "OP_VALIDATOR_PROOF_SYSTEM")]
    proof_system: Option<ProofSystemArg>,

    /// The endpoint of the trace prover or the zkVM prover.
    #[arg(long, help = "The endpoint of the trace prover or the zkVM prover.", env = "OP_VALIDATOR_PROVER_RPC")]
    prover_rpc: Option<String>,

    /// The endpoint of the witness generator.
    #[arg(long, help = "The endpoint of the witness generator.", env = "OP_VALIDATOR_WITNESS_RPC")]
    witness_rpc: Option<String>,

    /// The program verification key hash the Colosseum expects.
    #[arg(long, help = "The program verification key hash the Colosseum expects.", env = "OP_VALIDATOR_VKEY_HASH")]
    vkey_hash: Option<H256>,

    /// Seconds before a single prover request is abandoned.
    #[arg(long, default_value_t = 3600, help = "Seconds before a single prover request is abandoned.", env = "OP_VALIDATOR_PROVER_TIMEOUT")]
    prover_timeout: u64,

    /// The number of polls spent on a proof before the attempt is given up.
    #[arg(long, default_value_t = 720, help = "The number of polls spent on a proof before the attempt is given up.", env = "OP_VALIDATOR_PROOF_POLL_BUDGET")]
    proof_poll_budget: usize,
}

impl Args {
    /// Builds the [ProofSystem] from the prover arguments.
    fn proof_system(&self) -> Result<Option<ProofSystem>> {
        let timeout = Duration::from_secs(self.prover_timeout);
        let prover_url = || {
            self.prover_rpc
                .clone()
                .ok_or_else(|| anyhow!("--prover-rpc is required by the selected proof system"))
        };
        match self.proof_system {
            None => Ok(None),
            Some(ProofSystemArg::Trace) => Ok(Some(ProofSystem::Trace {
                url: prover_url()?,
                timeout,
            })),
            Some(ProofSystemArg::Witness) => Ok(Some(ProofSystem::Witness {
                prover_url: prover_url()?,
                witness_url: self
                    .witness_rpc
                    .clone()
                    .ok_or_else(|| anyhow!("--witness-rpc is required by the witness proof system"))?,
                timeout,
                expected_vkey_hash: self
                    .vkey_hash
                    .ok_or_else(|| anyhow!("--vkey-hash is required by the witness proof system"))?,
            })),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse the command arguments
    let args = Args::parse();

    // Initialize the tracing subscriber
    init_tracing_subscriber(args.v)?;

    if args.guardian_enabled && args.security_council.is_none() {
        bail!("--security-council is required when the guardian is enabled");
    }

    // Connect the signer to the websocket endpoint.
    tracing::debug!(target: "op-validator-cli", "Connecting to websocket endpoint...");
    let provider = Provider::<Ws>::connect(&args.ws_endpoint)
        .await
        .with_context(|| format!("failed to connect to {}", args.ws_endpoint))?;
    let chain_id = provider.get_chainid().await?.as_u64();
    let wallet = args
        .private_key
        .parse::<LocalWallet>()
        .context("invalid private key")?
        .with_chain_id(chain_id);
    let validator = wallet.address();
    let signer = Arc::new(SignerMiddleware::new(provider, wallet));
    tracing::info!(target: "op-validator-cli", "Websocket connected @ {}, validator {:?}", &args.ws_endpoint, validator);

    // Create the validator config.
    let config = Arc::new(ValidatorConfig {
        validator,
        colosseum: args.colosseum,
        l2_output_oracle: args.l2_output_oracle,
        validator_pool: args.validator_pool,
        validator_manager: args.validator_manager,
        security_council: args.security_council,
        output_poll_interval: Duration::from_secs(args.output_poll_interval),
        challenge_poll_interval: Duration::from_secs(args.challenge_poll_interval),
        guardian_poll_interval: Duration::from_secs(args.guardian_poll_interval),
        network_timeout: Duration::from_secs(args.network_timeout),
        receipt_timeout: Duration::from_secs(args.receipt_timeout),
        proof_poll_budget: args.proof_poll_budget,
        challenger_enabled: args.challenger_enabled,
        guardian_enabled: args.guardian_enabled,
        submitter_enabled: args.output_submitter_enabled,
        submitter_retry_interval: Duration::from_millis(args.output_submitter_retry_interval),
        submitter_round_buffer: args.output_submitter_round_buffer,
        allow_public_round: args.output_submitter_allow_public_round,
        allow_non_finalized: args.allow_non_finalized,
        l1_block_time: args.l1_block_time,
        proof_system: args.proof_system()?,
    });
    tracing::info!(target: "op-validator-cli", "Validator config created successfully.");

    let ledger: Arc<dyn LedgerGateway> = Arc::new(ContractGateway::new(signer, &config));
    let rollup: Arc<dyn RollupSource> = Arc::new(NodeRollupSource::try_connect(
        &args.rollup_rpc,
        &args.l2_rpc,
        config.network_timeout,
    )?);
    let prover = match &config.proof_system {
        Some(system) => Some(system.build().await?),
        None => {
            if config.challenger_enabled {
                tracing::warn!(target: "op-validator-cli", "No proof system configured, faults cannot be proven.");
            }
            None
        }
    };

    // Start the driver loops. Asserters defend their outputs even when challenging is disabled.
    let challenger = Challenger::new(Arc::clone(&config), Arc::clone(&ledger), Arc::clone(&rollup), prover);
    let mut drivers = JoinSet::new();
    drivers.spawn(ChallengeDriver::new(Arc::clone(&config), Arc::clone(&ledger), challenger.clone()).start_loop());
    if config.challenger_enabled {
        drivers.spawn(OutputMonitorDriver::new(Arc::clone(&config), Arc::clone(&ledger), challenger).start_loop());
    }
    if config.submitter_enabled {
        let submitter = OutputSubmitter::new(Arc::clone(&config), Arc::clone(&ledger), Arc::clone(&rollup));
        drivers.spawn(OutputSubmitterDriver::new(Arc::clone(&config), Arc::clone(&ledger), submitter).start_loop());
    }
    if config.guardian_enabled {
        let guardian = Guardian::new(Arc::clone(&config), Arc::clone(&ledger), rollup);
        drivers.spawn(GuardianDriver::new(Arc::clone(&config), ledger, guardian).start_loop());
    }
    tracing::info!(target: "op-validator-cli", "Drivers started, {} loop(s) running.", drivers.len());

    while let Some(result) = drivers.join_next().await {
        result??;
    }

    Ok(())
}

/// Initializes the tracing subscriber
///
/// # Arguments
/// * `verbosity_level` - The verbosity level (0-4)
///
/// # Returns
/// * `Result<()>` - Ok if successful, Err otherwise.
fn init_tracing_subscriber(verbosity_level: u8) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(match verbosity_level {
            0 => Level::ERROR,
            1 => Level::WARN,
            2 => Level::INFO,
            3 => Level::DEBUG,
            _ => Level::TRACE,
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber).map_err(|e| anyhow!(e))
}
