//! The `trace` module contains the [TraceProofFetcher], the client of the trace-based prover.
//!
//! The prover answers a single `prove` call with a proof and a final pairing value. Both are
//! sequences of 32-byte words whose bytes arrive reversed; [decode_words] is the only place that
//! knows about this.

use crate::{hex, ProverError, RpcClient};
use ethers::types::{Bytes, U256};
use serde::Deserialize;
use serde_json::Value;

/// The size of a single encoded word.
const WORD_SIZE: usize = 32;

/// The raw response of the trace prover's `prove` method.
#[derive(Debug, Clone, Deserialize)]
pub struct TraceProveResponse {
    /// The final pairing value, word encoded.
    #[serde(deserialize_with = "hex::deserialize_bytes")]
    pub final_pair: Bytes,
    /// The proof, word encoded.
    #[serde(deserialize_with = "hex::deserialize_bytes")]
    pub proof: Bytes,
}

/// A decoded trace proof.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProofAndPair {
    /// The proof words.
    pub proof: Vec<U256>,
    /// The final pairing words.
    pub pair: Vec<U256>,
}

impl TryFrom<TraceProveResponse> for ProofAndPair {
    type Error = ProverError;

    fn try_from(response: TraceProveResponse) -> Result<Self, Self::Error> {
        Ok(Self {
            proof: decode_words(&response.proof)?,
            pair: decode_words(&response.final_pair)?,
        })
    }
}

/// The [TraceProofFetcher] submits a block trace and waits for the proof in one round trip. The
/// prover queues work internally, so the network timeout of its [RpcClient] should be generous.
#[derive(Debug)]
pub struct TraceProofFetcher {
    rpc: RpcClient,
}

impl TraceProofFetcher {
    /// Creates a new [TraceProofFetcher].
    pub fn new(rpc: RpcClient) -> Self {
        Self { rpc }
    }

    /// Requests a proof for the given JSON-encoded block trace.
    pub async fn fetch_proof_and_pair(&self, trace: &str) -> Result<ProofAndPair, ProverError> {
        tracing::debug!(target: "prover", "Requesting trace proof from {}", self.rpc.url());
        let response: TraceProveResponse = self
            .rpc
            .call("prove", vec![Value::from(trace)])
            .await?;
        response.try_into()
    }
}

/// Decodes a sequence of byte-reversed 32-byte words into integers. Each word is reversed and
/// then read as a big-endian unsigned integer.
pub fn decode_words(data: &[u8]) -> Result<Vec<U256>, ProverError> {
    if data.len() % WORD_SIZE != 0 {
        return Err(ProverError::MalformedWords(data.len()));
    }

    Ok(data
        .chunks_exact(WORD_SIZE)
        .map(|chunk| {
            let mut word = [0u8; WORD_SIZE];
            word.copy_from_slice(chunk);
            word.reverse();
            U256::from_big_endian(&word)
        })
        .collect())
}

/// Encodes integers into byte-reversed 32-byte words; the inverse of [decode_words].
pub fn encode_words(words: &[U256]) -> Vec<u8> {
    let mut out = Vec::with_capacity(words.len() * WORD_SIZE);
    for value in words {
        let mut word = [0u8; WORD_SIZE];
        value.to_big_endian(&mut word);
        word.reverse();
        out.extend_from_slice(&word);
    }
    out
}
