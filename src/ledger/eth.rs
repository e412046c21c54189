use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::tx::{encode_register_node, encode_send_heartbeat, LegacyTransaction};
use super::{LedgerClient, LedgerError};
use crate::config::LedgerConfig;
use crate::identity::AgentCredential;

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionReceipt {
    status: Option<String>,
    block_number: Option<String>,
}

/// EVM ledger client speaking JSON-RPC to a node endpoint.
///
/// Every transaction runs nonce lookup, submission and receipt polling under
/// one lock, so calls from different tasks are strictly sequential.
pub struct EthLedgerClient {
    http: reqwest::Client,
    rpc_url: String,
    signing_key: SigningKey,
    from: String,
    contract: [u8; 20],
    chain_id: u64,
    gas_limit: Option<u64>,
    receipt_timeout: Duration,
    receipt_poll_interval: Duration,
    tx_lock: Mutex<()>,
    next_id: AtomicU64,
}

impl EthLedgerClient {
    /// Build the client and resolve the chain id (queried when not configured).
    pub async fn connect(
        config: &LedgerConfig,
        credential: &AgentCredential,
    ) -> Result<Self, LedgerError> {
        let contract = parse_address(&config.contract_address)?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let mut client = Self {
            http,
            rpc_url: config.rpc_url.clone(),
            signing_key: credential.signing_key().clone(),
            from: format!("0x{}", hex::encode(credential.identity().address())),
            contract,
            chain_id: config.chain_id.unwrap_or_default(),
            gas_limit: config.gas_limit,
            receipt_timeout: config.receipt_timeout,
            receipt_poll_interval: config.receipt_poll_interval,
            tx_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
        };

        if config.chain_id.is_none() {
            let raw: String = client.rpc("eth_chainId", json!([])).await?;
            client.chain_id = parse_quantity(&raw)? as u64;
        }

        tracing::info!(
            rpc_url = %client.rpc_url,
            chain_id = client.chain_id,
            contract = %config.contract_address,
            "Ledger client ready"
        );

        Ok(client)
    }

    async fn rpc_optional<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Value,
    ) -> Result<Option<T>, LedgerError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let response: RpcResponse<T> = self
            .http
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = response.error {
            return Err(LedgerError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(response.result)
    }

    async fn rpc<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Value,
    ) -> Result<T, LedgerError> {
        self.rpc_optional(method, params)
            .await?
            .ok_or(LedgerError::EmptyResult(method))
    }

    async fn estimate_gas(&self, to: &str, data: &str) -> Result<u64, LedgerError> {
        if let Some(limit) = self.gas_limit {
            return Ok(limit);
        }
        let raw: String = self
            .rpc(
                "eth_estimateGas",
                json!([{ "from": self.from, "to": to, "data": data }]),
            )
            .await?;
        let estimate = parse_quantity(&raw)? as u64;
        // 20% headroom over the node's estimate
        Ok(estimate.saturating_add(estimate / 5))
    }

    /// Sign, submit and wait for one contract call.
    async fn submit_call(&self, label: &'static str, data: Vec<u8>) -> Result<(), LedgerError> {
        let _guard = self.tx_lock.lock().await;

        let to = format!("0x{}", hex::encode(self.contract));
        let data_hex = format!("0x{}", hex::encode(&data));

        let nonce: String = self
            .rpc("eth_getTransactionCount", json!([self.from, "pending"]))
            .await?;
        let gas_price: String = self.rpc("eth_gasPrice", json!([])).await?;
        let gas_limit = self.estimate_gas(&to, &data_hex).await?;

        let tx = LegacyTransaction {
            nonce: parse_quantity(&nonce)? as u64,
            gas_price: parse_quantity(&gas_price)?,
            gas_limit,
            to: self.contract,
            value: 0,
            data,
        };
        let raw = tx.sign(&self.signing_key, self.chain_id)?;

        let tx_hash: String = self
            .rpc(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;
        tracing::debug!(call = label, tx_hash = %tx_hash, nonce = tx.nonce, "Transaction submitted");

        let receipt = self.wait_for_receipt(&tx_hash).await?;
        match receipt.status.as_deref() {
            Some("0x1") => {
                tracing::debug!(
                    call = label,
                    tx_hash = %tx_hash,
                    block = ?receipt.block_number,
                    "Transaction confirmed"
                );
                Ok(())
            }
            _ => Err(LedgerError::Reverted(tx_hash)),
        }
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<TransactionReceipt, LedgerError> {
        tokio::time::timeout(self.receipt_timeout, self.poll_receipt(tx_hash))
            .await
            .map_err(|_| LedgerError::ReceiptTimeout(tx_hash.to_string()))?
    }

    async fn poll_receipt(&self, tx_hash: &str) -> Result<TransactionReceipt, LedgerError> {
        loop {
            let receipt: Option<TransactionReceipt> = self
                .rpc_optional("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;
            if let Some(receipt) = receipt {
                return Ok(receipt);
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }
}

#[async_trait]
impl LedgerClient for EthLedgerClient {
    async fn register(&self, gpu_model: &str, vram_mib: u64) -> Result<(), LedgerError> {
        self.submit_call("registerNode", encode_register_node(gpu_model, vram_mib))
            .await
    }

    async fn heartbeat(&self) -> Result<(), LedgerError> {
        self.submit_call("sendHeartbeat", encode_send_heartbeat())
            .await
    }
}

pub fn parse_address(raw: &str) -> Result<[u8; 20], LedgerError> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    hex::decode(digits)
        .ok()
        .and_then(|bytes| <[u8; 20]>::try_from(bytes).ok())
        .ok_or_else(|| LedgerError::InvalidAddress(raw.to_string()))
}

/// Parse a JSON-RPC hex quantity such as `"0x1a"`.
pub fn parse_quantity(raw: &str) -> Result<u128, LedgerError> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| LedgerError::Malformed(format!("quantity without 0x prefix: {raw:?}")))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| LedgerError::Malformed(format!("bad quantity {raw:?}: {e}")))
}
