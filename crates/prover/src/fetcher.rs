//! The `fetcher` module holds the [ProofFetcher] trait, the request/poll capability shared by both
//! proof systems.

use crate::{
    ProofAndPair, ProofResponse, ProverError, RequestStatus, TraceProofFetcher, WitnessGenerator,
    WitnessResponse, ZkVmProver,
};
use async_trait::async_trait;
use ethers::types::{Bytes, H256};
use std::fmt;

/// The proof system a [ProofFetcher] talks to. Chosen once, at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofSystemKind {
    /// A succinct proof over a full block execution trace.
    Trace,
    /// A zkVM proof over a generated execution witness.
    Witness,
}

impl fmt::Display for ProofSystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Witness => write!(f, "witness"),
        }
    }
}

/// The input a proof system needs to prove a single block transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofInput {
    /// The JSON-encoded execution trace of the target block.
    Trace(String),
    /// The target block hash and the L1 head the challenge was created against.
    Block {
        /// The hash of the target L2 block.
        block_hash: H256,
        /// The L1 head recorded in the challenge.
        l1_head: H256,
    },
}

/// A request to prove the transition into `block_number`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofJob {
    /// The L2 block whose transition is proven.
    pub block_number: u64,
    /// The proof system specific input.
    pub input: ProofInput,
}

/// A proof ready to be submitted to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultProof {
    /// A trace proof.
    Trace(ProofAndPair),
    /// A zkVM proof.
    ZkVm {
        /// The verification key hash of the program that produced the proof.
        vkey_hash: H256,
        /// The public values committed by the proof.
        public_values: Bytes,
        /// The proof bytes.
        proof: Bytes,
    },
}

/// The outcome of a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofPoll {
    /// The backend is still working; poll again later.
    Pending(RequestStatus),
    /// The proof is ready.
    Ready(FaultProof),
}

/// The [ProofFetcher] trait is the request/poll contract shared by the proof systems.
///
/// Both operations are idempotent, so a caller may abandon a poll loop at any point and pick it
/// up again later.
#[async_trait]
pub trait ProofFetcher: fmt::Debug + Send + Sync {
    /// Returns the proof system of this fetcher.
    fn kind(&self) -> ProofSystemKind;

    /// Submits a job. Returns the status reported by the backend.
    async fn request(&self, job: &ProofJob) -> Result<RequestStatus, ProverError>;

    /// Polls a job once.
    async fn poll(&self, job: &ProofJob) -> Result<ProofPoll, ProverError>;
}

#[async_trait]
impl ProofFetcher for TraceProofFetcher {
    fn kind(&self) -> ProofSystemKind {
        ProofSystemKind::Trace
    }

    async fn request(&self, job: &ProofJob) -> Result<RequestStatus, ProverError> {
        // The trace prover has no separate submission phase; the work happens in `poll`.
        match job.input {
            ProofInput::Trace(_) => Ok(RequestStatus::Completed),
            ProofInput::Block { .. } => Err(ProverError::UnsupportedInput("trace")),
        }
    }

    async fn poll(&self, job: &ProofJob) -> Result<ProofPoll, ProverError> {
        let ProofInput::Trace(trace) = &job.input else {
            return Err(ProverError::UnsupportedInput("trace"));
        };
        let proof = self.fetch_proof_and_pair(trace).await?;
        Ok(ProofPoll::Ready(FaultProof::Trace(proof)))
    }
}

/// The [WitnessProofFetcher] drives the witness generator and the zkVM prover as one request/poll
/// job: the witness is generated first, then handed to the prover.
#[derive(Debug)]
pub struct WitnessProofFetcher {
    witness: WitnessGenerator,
    prover: ZkVmProver,
    expected_vkey_hash: H256,
}

impl WitnessProofFetcher {
    /// Creates a new [WitnessProofFetcher].
    ///
    /// ### Takes
    /// - `witness`: The witness generator client.
    /// - `prover`: The zkVM prover client.
    /// - `expected_vkey_hash`: The verification key hash the ledger accepts proofs for.
    pub fn new(witness: WitnessGenerator, prover: ZkVmProver, expected_vkey_hash: H256) -> Self {
        Self {
            witness,
            prover,
            expected_vkey_hash,
        }
    }

    /// Checks that the witness generator and the prover run the same proof system version, and
    /// that the prover's circuit is the one the ledger expects.
    pub async fn check_spec(&self) -> Result<(), ProverError> {
        let prover_spec = self.prover.spec().await?;
        let witness_spec = self.witness.spec().await?;

        if prover_spec.subversion != witness_spec.subversion {
            return Err(ProverError::IncompatibleSpec(format!(
                "prover runs {} but witness generator runs {}",
                prover_spec.subversion, witness_spec.subversion
            )));
        }
        if prover_spec.vkey_hash != self.expected_vkey_hash {
            return Err(ProverError::VKeyMismatch {
                expected: self.expected_vkey_hash,
                actual: prover_spec.vkey_hash,
            });
        }

        tracing::info!(target: "prover", "Proving backends agree on version {} ({})", prover_spec.subversion, prover_spec.version);
        Ok(())
    }

    fn block_input(job: &ProofJob) -> Result<(H256, H256), ProverError> {
        match job.input {
            ProofInput::Block {
                block_hash,
                l1_head,
            } => Ok((block_hash, l1_head)),
            ProofInput::Trace(_) => Err(ProverError::UnsupportedInput("witness")),
        }
    }
}

#[async_trait]
impl ProofFetcher for WitnessProofFetcher {
    fn kind(&self) -> ProofSystemKind {
        ProofSystemKind::Witness
    }

    async fn request(&self, job: &ProofJob) -> Result<RequestStatus, ProverError> {
        let (block_hash, l1_head) = Self::block_input(job)?;
        let status = self.witness.request_witness(block_hash, l1_head).await?;
        if status == RequestStatus::Failed {
            return Err(ProverError::RequestFailed(format!(
                "witness request for block #{} rejected",
                job.block_number
            )));
        }
        Ok(status)
    }

    async fn poll(&self, job: &ProofJob) -> Result<ProofPoll, ProverError> {
        let (block_hash, l1_head) = Self::block_input(job)?;

        // A proof the prover already knows about takes precedence over the witness phase.
        let proof = self.prover.get_proof(block_hash, l1_head).await?;
        if proof.status != RequestStatus::None {
            return classify_proof(job.block_number, proof, self.expected_vkey_hash);
        }

        let witness = self.witness.get_witness(block_hash, l1_head).await?;
        let Some(witness) = classify_witness(job.block_number, witness)? else {
            return Ok(ProofPoll::Pending(RequestStatus::Processing));
        };

        let status = self
            .prover
            .request_prove(block_hash, l1_head, &witness)
            .await?;
        if status == RequestStatus::Failed {
            return Err(ProverError::RequestFailed(format!(
                "proof request for block #{} rejected",
                job.block_number
            )));
        }
        tracing::debug!(target: "prover", "Submitted witness for block #{} to the prover, status {}", job.block_number, status);
        Ok(ProofPoll::Pending(RequestStatus::Processing))
    }
}

/// Maps a `getWitness` response to the witness, or `None` while it is still being generated.
fn classify_witness(
    block_number: u64,
    response: WitnessResponse,
) -> Result<Option<String>, ProverError> {
    match response.status {
        RequestStatus::None | RequestStatus::Processing => Ok(None),
        RequestStatus::Failed => Err(ProverError::RequestFailed(format!(
            "witness generation for block #{block_number} failed"
        ))),
        RequestStatus::Completed => Ok(Some(response.witness)),
    }
}

/// Maps a `getProof` response to a [ProofPoll], checking the verification key of completed
/// proofs.
fn classify_proof(
    block_number: u64,
    response: ProofResponse,
    expected_vkey_hash: H256,
) -> Result<ProofPoll, ProverError> {
    match response.status {
        RequestStatus::None | RequestStatus::Processing => Ok(ProofPoll::Pending(response.status)),
        RequestStatus::Failed => Err(ProverError::RequestFailed(format!(
            "proof generation for block #{block_number} failed (request {})",
            response.request_id
        ))),
        RequestStatus::Completed => {
            if response.vkey_hash != expected_vkey_hash {
                return Err(ProverError::VKeyMismatch {
                    expected: expected_vkey_hash,
                    actual: response.vkey_hash,
                });
            }
            Ok(ProofPoll::Ready(FaultProof::ZkVm {
                vkey_hash: response.vkey_hash,
                public_values: response.public_values,
                proof: response.proof,
            }))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        test_utils::{ok, StubBackend},
        RpcClient,
    };
    use serde_json::{json, Value};
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    fn vkey(byte: u8) -> String {
        format!("0x{}", format!("{byte:02x}").repeat(32))
    }

    fn spec(subversion: &str, vkey_byte: u8) -> Value {
        json!({ "version": "0.1.0", "subversion": subversion, "vkey_hash": vkey(vkey_byte) })
    }

    fn fetcher(witness: &StubBackend, prover: &StubBackend, expected: H256) -> WitnessProofFetcher {
        let timeout = Duration::from_secs(5);
        WitnessProofFetcher::new(
            WitnessGenerator::new(RpcClient::try_new(&witness.url, timeout).unwrap()),
            ZkVmProver::new(RpcClient::try_new(&prover.url, timeout).unwrap()),
            expected,
        )
    }

    fn job() -> ProofJob {
        ProofJob {
            block_number: 11,
            input: ProofInput::Block {
                block_hash: H256::repeat_byte(1),
                l1_head: H256::repeat_byte(2),
            },
        }
    }

    fn zkvm_proof() -> FaultProof {
        FaultProof::ZkVm {
            vkey_hash: H256::repeat_byte(9),
            public_values: Bytes::from(vec![1u8]),
            proof: Bytes::from(vec![2u8]),
        }
    }

    #[test]
    fn classify_proof_statuses() {
        let expected = H256::repeat_byte(9);
        let response = |status| ProofResponse {
            status,
            vkey_hash: expected,
            request_id: "r".to_string(),
            public_values: Bytes::from(vec![1u8]),
            proof: Bytes::from(vec![2u8]),
        };

        assert_eq!(
            classify_proof(1, response(RequestStatus::Processing), expected).unwrap(),
            ProofPoll::Pending(RequestStatus::Processing)
        );
        assert_eq!(
            classify_proof(1, response(RequestStatus::Completed), expected).unwrap(),
            ProofPoll::Ready(zkvm_proof())
        );
        assert!(matches!(
            classify_proof(1, response(RequestStatus::Failed), expected),
            Err(ProverError::RequestFailed(_))
        ));
        assert!(matches!(
            classify_proof(1, response(RequestStatus::Completed), H256::zero()),
            Err(ProverError::VKeyMismatch { .. })
        ));
    }

    #[test]
    fn classify_witness_statuses() {
        let response = |status| WitnessResponse {
            status,
            vkey_hash: H256::zero(),
            witness: "0xwitness".to_string(),
        };
        assert_eq!(classify_witness(1, response(RequestStatus::None)).unwrap(), None);
        assert_eq!(
            classify_witness(1, response(RequestStatus::Completed)).unwrap(),
            Some("0xwitness".to_string())
        );
        assert!(classify_witness(1, response(RequestStatus::Failed)).is_err());
    }

    #[tokio::test]
    async fn witness_is_generated_before_the_proof_is_requested() {
        let witness_polls = AtomicUsize::new(0);
        let witness = StubBackend::spawn(move |method, _| match method {
            "requestWitness" => ok(json!("Processing")),
            "getWitness" => {
                let status = match witness_polls.fetch_add(1, Ordering::SeqCst) {
                    0 => "Processing",
                    _ => "Completed",
                };
                ok(json!({ "status": status, "vkey_hash": vkey(9), "witness": "0xbeef" }))
            }
            _ => ok(Value::Null),
        })
        .await;
        let proof_polls = AtomicUsize::new(0);
        let prover = StubBackend::spawn(move |method, params| match method {
            "requestProve" => {
                assert_eq!(params[2], json!("0xbeef"));
                ok(json!("Processing"))
            }
            "getProof" => {
                let status = match proof_polls.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => "None",
                    2 => "Processing",
                    _ => "Completed",
                };
                ok(json!({
                    "status": status,
                    "vkey_hash": vkey(9),
                    "request_id": "r",
                    "public_values": "0x01",
                    "proof": "0x02",
                }))
            }
            _ => ok(Value::Null),
        })
        .await;
        let fetcher = fetcher(&witness, &prover, H256::repeat_byte(9));

        assert_eq!(fetcher.request(&job()).await.unwrap(), RequestStatus::Processing);
        let mut polls = Vec::new();
        for _ in 0..4 {
            polls.push(fetcher.poll(&job()).await.unwrap());
        }

        assert_eq!(
            polls,
            vec![
                ProofPoll::Pending(RequestStatus::Processing),
                ProofPoll::Pending(RequestStatus::Processing),
                ProofPoll::Pending(RequestStatus::Processing),
                ProofPoll::Ready(zkvm_proof()),
            ]
        );
        assert_eq!(
            witness.calls(),
            vec!["requestWitness", "getWitness", "getWitness"]
        );
        assert_eq!(
            prover.calls(),
            vec!["getProof", "getProof", "requestProve", "getProof", "getProof"]
        );
    }

    #[tokio::test]
    async fn failed_witness_ends_the_job() {
        let witness = StubBackend::spawn(|_, _| {
            ok(json!({ "status": "Failed", "vkey_hash": "", "witness": "" }))
        })
        .await;
        let prover = StubBackend::spawn(|_, _| {
            ok(json!({ "status": "None", "vkey_hash": "", "request_id": "", "public_values": "", "proof": "" }))
        })
        .await;
        let fetcher = fetcher(&witness, &prover, H256::repeat_byte(9));

        assert!(matches!(
            fetcher.poll(&job()).await,
            Err(ProverError::RequestFailed(_))
        ));
        assert_eq!(prover.calls(), vec!["getProof"]);
    }

    #[tokio::test]
    async fn spec_check_rejects_mismatched_backends() {
        let witness = StubBackend::spawn(|_, _| ok(spec("v3.0.0", 9))).await;
        let prover = StubBackend::spawn(|_, _| ok(spec("v3.0.0", 9))).await;
        fetcher(&witness, &prover, H256::repeat_byte(9))
            .check_spec()
            .await
            .unwrap();

        assert!(matches!(
            fetcher(&witness, &prover, H256::repeat_byte(7)).check_spec().await,
            Err(ProverError::VKeyMismatch { .. })
        ));

        let old_witness = StubBackend::spawn(|_, _| ok(spec("v2.0.0", 9))).await;
        assert!(matches!(
            fetcher(&old_witness, &prover, H256::repeat_byte(9)).check_spec().await,
            Err(ProverError::IncompatibleSpec(_))
        ));
    }
}
