use ethers::{
    prelude::{k256::ecdsa::SigningKey, SignerMiddleware},
    providers::{Provider, Ws},
    signers::Wallet,
    types::{Address, Bytes, H256, U256},
};
use op_validator_solvers::challenge::{is_output_deleted, Segments};
use serde::{Deserialize, Serialize};

/// The [SignerMiddlewareWS] type is the websocket provider that signs and sends ledger
/// transactions on behalf of the validator.
pub type SignerMiddlewareWS = SignerMiddleware<Provider<Ws>, Wallet<SigningKey>>;

/// An output root as recorded by the L2OutputOracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L2Output {
    /// The committed output root. Zero once the output has been deleted.
    pub output_root: H256,
    /// The validator that submitted the output.
    pub submitter: Address,
    /// The L1 timestamp of the submission.
    pub timestamp: u64,
    /// The L2 block the output commits to.
    pub l2_block_number: u64,
}

impl L2Output {
    /// Returns true if the output has been deleted.
    pub fn is_deleted(&self) -> bool {
        is_output_deleted(&self.output_root)
    }
}

/// A challenge as recorded by the Colosseum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeInfo {
    /// The number of bisection turns taken so far. Creation is turn 1.
    pub turn: u8,
    /// The L1 timestamp at which the current turn expires.
    pub timeout_at: u64,
    /// The submitter of the disputed output.
    pub asserter: Address,
    /// The disputing validator.
    pub challenger: Address,
    /// The segment currently under dispute, as last submitted by either party.
    pub segments: Segments,
    /// The L1 head recorded when the challenge was created.
    pub l1_head: H256,
}

/// An L1 block identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockId {
    /// The block hash.
    pub hash: H256,
    /// The block number.
    pub number: u64,
}

/// The output root recomputed by the trusted rollup node for an L2 block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalOutput {
    /// The trusted output root.
    pub output_root: H256,
    /// The L1 origin of the L2 block.
    pub l1_origin: BlockId,
}

/// An output computed by the trusted rollup node, ready to be submitted to the L2OutputOracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputProposal {
    /// The output root.
    pub output_root: H256,
    /// The L2 block the output commits to.
    pub l2_block_number: u64,
    /// The L1 block the rollup node had derived up to when it computed the output.
    pub current_l1: BlockId,
}

/// The remote (ledger) and local (trusted node) views of one output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outputs {
    /// The output as submitted to the ledger.
    pub remote: L2Output,
    /// The output recomputed by the trusted node.
    pub local: LocalOutput,
}

/// The block range of an invalid output, to be disputed by a new challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputRange {
    /// The index of the invalid output.
    pub output_index: u64,
    /// The block the disputed window starts at.
    pub start_block: u64,
    /// The block the disputed output commits to.
    pub end_block: u64,
    /// The L1 origin of the local output at `end_block`.
    pub l1_origin: BlockId,
}

/// Progress of the rollup node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStatus {
    /// The L1 head block number.
    pub head_l1: u64,
    /// The safe L2 block number.
    pub safe_l2: u64,
    /// The finalized L2 block number.
    pub finalized_l2: u64,
}

/// A `ChallengeCreated` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChallengeCreated {
    /// The disputed output index.
    pub output_index: u64,
    /// The submitter of the disputed output.
    pub asserter: Address,
    /// The disputing validator.
    pub challenger: Address,
}

/// A `ValidationRequested` event of the SecurityCouncil: a proof deleted an output and the
/// council asks guardians whether the deletion was correct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationRequested {
    /// The multisig transaction that dismisses the challenge if confirmed.
    pub transaction_id: U256,
    /// The output root that was deleted.
    pub output_root: H256,
    /// The L2 block the deleted output committed to.
    pub l2_block_number: u64,
}

/// A `DeletionRequested` event of the SecurityCouncil: a guardian asks to force-delete an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionRequested {
    /// The multisig transaction that deletes the output if confirmed.
    pub transaction_id: U256,
    /// The output to delete.
    pub output_index: u64,
}

/// A resolving proof in the shape the Colosseum accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultSubmission {
    /// A trace proof, together with the public input proof of the transition.
    ZkEvm {
        /// The ABI-encoded public input proof assembled by the rollup node.
        public_input_proof: Bytes,
        /// The proof words.
        proof: Vec<U256>,
        /// The first four words of the final pair.
        pair: Vec<U256>,
    },
    /// A zkVM proof.
    ZkVm {
        /// The verification key hash of the proving program.
        vkey_hash: H256,
        /// The public values committed by the proof.
        public_values: Bytes,
        /// The proof bytes.
        proof: Bytes,
    },
}

/// Whether a polling loop should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Nothing more to do; end the loop.
    Stop,
    /// Poll again after the interval.
    Continue,
    /// A proof is still being generated; poll again after the interval.
    Pending,
}

/// The outcome of a fault proving attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProveOutcome {
    /// The proof was submitted in the given transaction.
    Submitted(H256),
    /// The proving backend is not done yet; call again later. No transaction was sent.
    Retry,
}
