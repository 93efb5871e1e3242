//! The `rollup` module contains the [RollupSource] trait, the validator's source of truth for the
//! L2 chain, and [NodeRollupSource], its implementation over a trusted rollup node and L2 client.

use crate::{BlockId, LocalOutput, OutputProposal, SyncStatus};
use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use ethers::{
    providers::{Http, Middleware, Provider},
    types::{Bytes, H256},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::{sync::Arc, time::Duration};

/// The [RollupSource] trait is everything the validator needs to know about the L2 chain. Every
/// answer is trusted.
#[async_trait]
pub trait RollupSource: Send + Sync {
    /// Returns the locally computed output at `block_number`.
    async fn output_at_block(&self, block_number: u64) -> Result<LocalOutput>;

    /// Returns the output at `block_number` together with the L1 block it was derived up to.
    async fn output_proposal(&self, block_number: u64) -> Result<OutputProposal>;

    /// Returns the hash of the L2 block at `block_number`.
    async fn block_hash(&self, block_number: u64) -> Result<H256>;

    /// Returns the JSON-encoded execution trace of the L2 block at `block_number`.
    async fn block_trace(&self, block_number: u64) -> Result<String>;

    /// Returns the public input proof of the transition out of `block_number`, as assembled by
    /// the rollup node.
    async fn public_input_proof(&self, block_number: u64) -> Result<Bytes>;

    /// Returns the sync status of the rollup node.
    async fn sync_status(&self) -> Result<SyncStatus>;
}

/// The `kroma_outputAtBlock` response of the rollup node. Only the fields the validator reads are
/// decoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputAtBlockResponse {
    /// The output version. Only version 0 is understood.
    #[serde(default)]
    pub version: H256,
    /// The output root.
    pub output_root: H256,
    /// The L2 block the output commits to.
    pub block_ref: L2BlockRef,
    /// The sync status of the node when it computed the output.
    #[serde(default)]
    pub sync_status: Option<OutputSyncStatus>,
}

/// The part of the node's sync status that an output submission commits to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSyncStatus {
    /// The L1 block the node has derived up to.
    pub current_l1: BlockId,
}

/// An L2 block reference as reported by the rollup node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L2BlockRef {
    /// The block hash.
    pub hash: H256,
    /// The block number.
    pub number: u64,
    /// The L1 block the L2 block was derived from.
    pub l1origin: BlockId,
}

/// The `kroma_outputWithProofAtBlock` response of the rollup node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputWithProofResponse {
    /// The output root.
    pub output_root: H256,
    /// The node-assembled public input proof. `None` for empty blocks.
    #[serde(default)]
    pub public_input_proof: Option<Bytes>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BlockNumberRef {
    number: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SyncStatusResponse {
    head_l1: BlockNumberRef,
    safe_l2: BlockNumberRef,
    finalized_l2: BlockNumberRef,
}

impl From<SyncStatusResponse> for SyncStatus {
    fn from(status: SyncStatusResponse) -> Self {
        Self {
            head_l1: status.head_l1.number,
            safe_l2: status.safe_l2.number,
            finalized_l2: status.finalized_l2.number,
        }
    }
}

/// The [NodeRollupSource] queries the trusted rollup node for outputs and the L2 execution client
/// for blocks and traces. Every call is bounded by the network timeout.
#[derive(Debug, Clone)]
pub struct NodeRollupSource {
    /// The rollup node. This RPC must be fully trusted; it is the validator's source of truth.
    node: Arc<Provider<Http>>,
    /// The L2 execution client.
    l2: Arc<Provider<Http>>,
    network_timeout: Duration,
}

impl NodeRollupSource {
    /// Creates a new [NodeRollupSource].
    pub fn new(node: Arc<Provider<Http>>, l2: Arc<Provider<Http>>, network_timeout: Duration) -> Self {
        Self {
            node,
            l2,
            network_timeout,
        }
    }

    /// Connects to the rollup node and the L2 client at the given URLs.
    pub fn try_connect(node_url: &str, l2_url: &str, network_timeout: Duration) -> Result<Self> {
        let node = Provider::<Http>::try_from(node_url)
            .with_context(|| format!("invalid rollup node url {}", node_url))?;
        let l2 = Provider::<Http>::try_from(l2_url)
            .with_context(|| format!("invalid L2 client url {}", l2_url))?;
        Ok(Self::new(Arc::new(node), Arc::new(l2), network_timeout))
    }

    async fn request<T>(&self, provider: &Provider<Http>, method: &str, block_number: Option<u64>) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + std::fmt::Debug,
    {
        let params: Vec<String> = block_number
            .map(|n| vec![format!("0x{:x}", n)])
            .unwrap_or_default();
        tokio::time::timeout(self.network_timeout, provider.request(method, params))
            .await
            .map_err(|_| anyhow!("{} timed out after {:?}", method, self.network_timeout))?
            .with_context(|| format!("{} failed", method))
    }
}

#[async_trait]
impl RollupSource for NodeRollupSource {
    async fn output_at_block(&self, block_number: u64) -> Result<LocalOutput> {
        let output: OutputAtBlockResponse = self
            .request(&self.node, "kroma_outputAtBlock", Some(block_number))
            .await?;
        Ok(LocalOutput {
            output_root: output.output_root,
            l1_origin: output.block_ref.l1origin,
        })
    }

    async fn output_proposal(&self, block_number: u64) -> Result<OutputProposal> {
        let output: OutputAtBlockResponse = self
            .request(&self.node, "kroma_outputAtBlock", Some(block_number))
            .await?;
        ensure!(
            output.version.is_zero(),
            "unsupported output version {:?}",
            output.version
        );
        let status = output
            .sync_status
            .ok_or(anyhow!("output at block #{} carries no sync status", block_number))?;
        Ok(OutputProposal {
            output_root: output.output_root,
            l2_block_number: output.block_ref.number,
            current_l1: status.current_l1,
        })
    }

    async fn block_hash(&self, block_number: u64) -> Result<H256> {
        let block = tokio::time::timeout(self.network_timeout, self.l2.get_block(block_number))
            .await
            .map_err(|_| anyhow!("fetching L2 block #{} timed out", block_number))??
            .ok_or(anyhow!("L2 block #{} not found", block_number))?;
        block
            .hash
            .ok_or(anyhow!("L2 block #{} is pending", block_number))
    }

    async fn block_trace(&self, block_number: u64) -> Result<String> {
        let trace: Value = self
            .request(&self.l2, "kroma_getBlockTraceByNumberOrHash", Some(block_number))
            .await?;
        Ok(trace.to_string())
    }

    async fn public_input_proof(&self, block_number: u64) -> Result<Bytes> {
        let output: OutputWithProofResponse = self
            .request(&self.node, "kroma_outputWithProofAtBlock", Some(block_number))
            .await?;
        output
            .public_input_proof
            .ok_or(anyhow!("block #{} is empty, no public input proof", block_number))
    }

    async fn sync_status(&self) -> Result<SyncStatus> {
        let status: SyncStatusResponse = self.request(&self.node, "kroma_syncStatus", None).await?;
        Ok(status.into())
    }
}
