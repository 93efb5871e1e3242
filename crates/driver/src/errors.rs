//! Contains the error types of the validator orchestration.

use op_validator_prover::ProverError;
use op_validator_solvers::challenge::ChallengeStatus;
use thiserror::Error;

/// A [Result] type for the [ValidatorError].
pub type ValidatorResult<T> = Result<T, ValidatorError>;

/// An error surfaced by a validator operation. Every variant keeps its full cause chain.
#[derive(Error, Debug)]
pub enum ValidatorError {
    /// A local check failed before anything was submitted.
    #[error("Precondition failed: {0}")]
    Precondition(#[from] PreconditionError),
    /// The proving backend failed.
    #[error("Prover error: {0}")]
    Prover(#[from] ProverError),
    /// A ledger query or submission failed, or a submitted transaction reverted.
    #[error("Ledger error: {0:#}")]
    Ledger(anyhow::Error),
    /// The trusted rollup node could not be queried.
    #[error("Rollup node error: {0:#}")]
    Rollup(anyhow::Error),
    /// The ledger returned segments that violate the bisection geometry.
    #[error("Invalid segments: {0:#}")]
    Segments(anyhow::Error),
}

/// A precondition that must hold before an action is submitted to the ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    /// The output has been finalized and can no longer be disputed.
    #[error("output {0} is already finalized")]
    OutputFinalized(u64),
    /// The output has already been deleted.
    #[error("output {0} has already been deleted")]
    OutputDeleted(u64),
    /// The challenge is not in a status that allows the action.
    #[error("challenge status is {actual}, expected one of {expected:?}")]
    UnexpectedStatus {
        /// The statuses that allow the action.
        expected: Vec<ChallengeStatus>,
        /// The status reported by the ledger.
        actual: ChallengeStatus,
    },
    /// The challenge creation period of the output is over.
    #[error("challenge creation period of output {0} has passed")]
    OutsideCreationWindow(u64),
    /// This validator already has a challenge in progress against the output.
    #[error("challenge against output {0} is already in progress")]
    ChallengeInProgress(u64),
    /// The output matches the trusted node's output.
    #[error("output {0} is valid")]
    OutputValid(u64),
    /// The validator is not allowed to create a challenge.
    #[error("validator cannot create a challenge: {0}")]
    NotEligible(String),
    /// The first checkpoint differs, which the protocol never allows.
    #[error("the first segment must be matched when bisecting")]
    FirstSegmentMismatch,
    /// Every checkpoint matches the trusted node.
    #[error("failed to select fault position: all segments match")]
    NoFaultPosition,
    /// Fault proving was requested but no proving backend is configured.
    #[error("no proving backend configured")]
    ProverNotConfigured,
}
