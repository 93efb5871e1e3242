//! The `witness` module contains the clients of the witness generator and of the zkVM prover.
//!
//! Both follow the same request/poll protocol: a `request*` call submits the job and returns a
//! [RequestStatus] immediately, and the matching `get*` call is polled until the status is
//! terminal.

use crate::{hex, ProverError, RpcClient};
use ethers::types::{Bytes, H256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The status of a request submitted to a proving backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    /// The backend does not know the request.
    None,
    /// The request is being worked on.
    Processing,
    /// The result is available.
    Completed,
    /// The backend gave up on the request.
    Failed,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The response of the `spec` method, shared by the witness generator and the prover.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SpecResponse {
    /// The version of the backend.
    pub version: String,
    /// The version of the underlying proof system.
    #[serde(alias = "sp1_version")]
    pub subversion: String,
    /// The hash of the circuit verification key.
    #[serde(deserialize_with = "hex::deserialize_hash")]
    pub vkey_hash: H256,
}

/// The response of the witness generator's `getWitness` method.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WitnessResponse {
    /// The status of the witness request.
    #[serde(alias = "request_status")]
    pub status: RequestStatus,
    /// The verification key hash the witness was generated for.
    #[serde(default, deserialize_with = "hex::deserialize_hash")]
    pub vkey_hash: H256,
    /// The opaque witness, passed through to the prover as is.
    #[serde(default)]
    pub witness: String,
}

/// The response of the prover's `getProof` method.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProofResponse {
    /// The status of the proof request.
    #[serde(alias = "request_status")]
    pub status: RequestStatus,
    /// The verification key hash of the circuit that produced the proof.
    #[serde(default, deserialize_with = "hex::deserialize_hash")]
    pub vkey_hash: H256,
    /// The identifier the prover assigned to the request.
    #[serde(default)]
    pub request_id: String,
    /// The public values committed by the proof.
    #[serde(default, deserialize_with = "hex::deserialize_bytes")]
    pub public_values: Bytes,
    /// The proof bytes.
    #[serde(default, deserialize_with = "hex::deserialize_bytes")]
    pub proof: Bytes,
}

fn block_params(block_hash: H256, l1_head: H256) -> Vec<Value> {
    vec![
        Value::from(hex::encode(block_hash)),
        Value::from(hex::encode(l1_head)),
    ]
}

/// Client of the witness generator.
#[derive(Debug)]
pub struct WitnessGenerator {
    rpc: RpcClient,
}

impl WitnessGenerator {
    /// Creates a new [WitnessGenerator].
    pub fn new(rpc: RpcClient) -> Self {
        Self { rpc }
    }

    /// Queries the proof system version and verification key hash.
    pub async fn spec(&self) -> Result<SpecResponse, ProverError> {
        self.rpc.call("spec", vec![]).await
    }

    /// Submits a witness generation job for `block_hash` derived up to `l1_head`.
    pub async fn request_witness(
        &self,
        block_hash: H256,
        l1_head: H256,
    ) -> Result<RequestStatus, ProverError> {
        self.rpc
            .call("requestWitness", block_params(block_hash, l1_head))
            .await
    }

    /// Polls a witness generation job.
    pub async fn get_witness(
        &self,
        block_hash: H256,
        l1_head: H256,
    ) -> Result<WitnessResponse, ProverError> {
        self.rpc
            .call("getWitness", block_params(block_hash, l1_head))
            .await
    }
}

/// Client of the zkVM prover.
#[derive(Debug)]
pub struct ZkVmProver {
    rpc: RpcClient,
}

impl ZkVmProver {
    /// Creates a new [ZkVmProver].
    pub fn new(rpc: RpcClient) -> Self {
        Self { rpc }
    }

    /// Queries the proof system version and verification key hash.
    pub async fn spec(&self) -> Result<SpecResponse, ProverError> {
        self.rpc.call("spec", vec![]).await
    }

    /// Submits a proving job for `block_hash` with a previously generated witness.
    pub async fn request_prove(
        &self,
        block_hash: H256,
        l1_head: H256,
        witness: &str,
    ) -> Result<RequestStatus, ProverError> {
        let mut params = block_params(block_hash, l1_head);
        params.push(Value::from(witness));
        self.rpc.call("requestProve", params).await
    }

    /// Polls a proving job.
    pub async fn get_proof(
        &self,
        block_hash: H256,
        l1_head: H256,
    ) -> Result<ProofResponse, ProverError> {
        self.rpc
            .call("getProof", block_params(block_hash, l1_head))
            .await
    }
}
