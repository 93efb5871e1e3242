//! Clients for the external proving backends.
//!
//! Two proof systems are supported behind the [ProofFetcher] capability trait:
//! - [TraceProofFetcher]: submits a full block trace and receives a succinct proof in a single
//!   round trip.
//! - [WitnessProofFetcher]: a witness generator and a zkVM prover driven through a
//!   request/poll protocol.
//!
//! Both speak the same numbered-id JSON-RPC envelope through [RpcClient].

mod errors;
pub use errors::ProverError;

pub mod hex;

mod rpc;
pub use rpc::{decode_response, RpcClient};

mod trace;
pub use trace::{decode_words, encode_words, ProofAndPair, TraceProofFetcher, TraceProveResponse};

mod witness;
pub use witness::{
    ProofResponse, RequestStatus, SpecResponse, WitnessGenerator, WitnessResponse, ZkVmProver,
};

mod fetcher;
pub use fetcher::{
    FaultProof, ProofFetcher, ProofInput, ProofJob, ProofPoll, ProofSystemKind,
    WitnessProofFetcher,
};

#[cfg(test)]
mod test_utils;
