//! Ledger client: capability registration and liveness heartbeats.

pub mod eth;
pub mod tx;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::AgentError;
use crate::hwinfo::GpuInfo;

pub use eth::EthLedgerClient;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid contract address {0:?}")]
    InvalidAddress(String),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("JSON-RPC call {0} returned no result")]
    EmptyResult(&'static str),

    #[error("malformed JSON-RPC response: {0}")]
    Malformed(String),

    #[error("failed to sign transaction: {0}")]
    Signing(#[from] k256::ecdsa::Error),

    #[error("transaction {0} reverted")]
    Reverted(String),

    #[error("timed out waiting for receipt of transaction {0}")]
    ReceiptTimeout(String),
}

/// Writes to the ledger. Both calls return only once the write is confirmed.
///
/// Implementations must serialize their own transactions: the registrar and
/// the heartbeat supervisor share one client.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn register(&self, gpu_model: &str, vram_mib: u64) -> Result<(), LedgerError>;
    async fn heartbeat(&self) -> Result<(), LedgerError>;
}

/// Capability registrar: announce GPU model and VRAM once at startup.
pub async fn register_capability(
    ledger: &dyn LedgerClient,
    gpu: &GpuInfo,
) -> Result<(), AgentError> {
    tracing::info!(gpu_model = %gpu.model, vram_mib = gpu.vram_mib, "Registering node capability");

    ledger
        .register(&gpu.model, gpu.vram_mib)
        .await
        .map_err(AgentError::Registration)?;

    tracing::info!("Node registered successfully");
    Ok(())
}
