//! Contains the error type returned by the proving backend clients.

use ethers::types::H256;
use thiserror::Error;

/// An error produced while talking to a proving backend. None of these are retried by the
/// clients themselves; retry policy belongs to the caller.
#[derive(Error, Debug)]
pub enum ProverError {
    /// The backend endpoint is not a valid URL.
    #[error("Invalid endpoint: {0}")]
    InvalidUrl(String),
    /// The request could not be delivered, or timed out.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The backend answered with an error envelope.
    #[error("RPC error [{code}]: {message}")]
    Rpc {
        /// The error code.
        code: i64,
        /// The error message.
        message: String,
        /// Optional backend-specific data.
        data: Option<serde_json::Value>,
    },
    /// The response did not have the expected shape.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
    /// A hex-encoded field could not be decoded.
    #[error("Invalid hex: {0}")]
    InvalidHex(String),
    /// A word-encoded payload was not a whole number of 32-byte words.
    #[error("Malformed proof words: {0} bytes is not a multiple of 32")]
    MalformedWords(usize),
    /// The proof pair is shorter than the verifier requires.
    #[error("Proof pair has {0} words, at least {1} are required")]
    ShortPair(usize, usize),
    /// The envelope carried neither a result nor an error.
    #[error("Response carried neither a result nor an error")]
    MissingResult,
    /// The backend reported that the request failed.
    #[error("Request failed on the proving backend: {0}")]
    RequestFailed(String),
    /// The proof was produced by a circuit other than the expected one.
    #[error("Verification key mismatch: expected {expected:?}, got {actual:?}")]
    VKeyMismatch {
        /// The verification key hash the ledger expects.
        expected: H256,
        /// The verification key hash reported by the backend.
        actual: H256,
    },
    /// The witness generator and prover do not run compatible proof systems.
    #[error("Incompatible proving backends: {0}")]
    IncompatibleSpec(String),
    /// The job input does not match the proof system of the fetcher.
    #[error("Unsupported proof input for the {0} proof system")]
    UnsupportedInput(&'static str),
    /// The caller's poll budget ran out while the backend was still processing.
    #[error("Proof not ready after {0} polls")]
    PollBudgetExhausted(usize),
}
