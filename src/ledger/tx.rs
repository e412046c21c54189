//! Contract call encoding and legacy (EIP-155) transaction signing.

use alloy_rlp::Header;
use k256::ecdsa::SigningKey;

use crate::identity::keccak256;

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// Wrap already-encoded items in an RLP list header.
fn rlp_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload_length = items.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(payload_length + 9);
    Header {
        list: true,
        payload_length,
    }
    .encode(&mut out);
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

pub fn function_selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn abi_word_u64(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Calldata for `registerNode(string,uint64)`.
pub fn encode_register_node(gpu_model: &str, vram_mib: u64) -> Vec<u8> {
    let model = gpu_model.as_bytes();
    let padded_len = model.len().div_ceil(32) * 32;

    let mut data = Vec::with_capacity(4 + 32 * 3 + padded_len);
    data.extend_from_slice(&function_selector("registerNode(string,uint64)"));
    // head: offset of the dynamic string, then the static uint64
    data.extend_from_slice(&abi_word_u64(64));
    data.extend_from_slice(&abi_word_u64(vram_mib));
    // tail: length-prefixed, right-padded bytes
    data.extend_from_slice(&abi_word_u64(model.len() as u64));
    data.extend_from_slice(model);
    data.resize(data.len() + (padded_len - model.len()), 0);
    data
}

/// Calldata for `sendHeartbeat()`.
pub fn encode_send_heartbeat() -> Vec<u8> {
    function_selector("sendHeartbeat()").to_vec()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: [u8; 20],
    pub value: u128,
    pub data: Vec<u8>,
}

impl LegacyTransaction {
    fn base_fields(&self) -> Vec<Vec<u8>> {
        vec![
            alloy_rlp::encode(self.nonce),
            alloy_rlp::encode(self.gas_price),
            alloy_rlp::encode(self.gas_limit),
            alloy_rlp::encode(&self.to[..]),
            alloy_rlp::encode(self.value),
            alloy_rlp::encode(self.data.as_slice()),
        ]
    }

    /// EIP-155 signing payload: the six fields followed by `chain_id, 0, 0`.
    pub fn signing_payload(&self, chain_id: u64) -> Vec<u8> {
        let mut fields = self.base_fields();
        fields.push(alloy_rlp::encode(chain_id));
        fields.push(alloy_rlp::encode(0u8));
        fields.push(alloy_rlp::encode(0u8));
        rlp_list(&fields)
    }

    pub fn signing_hash(&self, chain_id: u64) -> [u8; 32] {
        keccak256(&self.signing_payload(chain_id))
    }

    /// Sign and return the raw transaction bytes for `eth_sendRawTransaction`.
    pub fn sign(&self, key: &SigningKey, chain_id: u64) -> Result<Vec<u8>, k256::ecdsa::Error> {
        let hash = self.signing_hash(chain_id);
        let (signature, recovery_id) = key.sign_prehash_recoverable(&hash)?;
        let sig_bytes = signature.to_bytes();
        let (r, s) = sig_bytes.split_at(32);
        let v = recovery_id.to_byte() as u128 + chain_id as u128 * 2 + 35;

        let mut fields = self.base_fields();
        fields.push(alloy_rlp::encode(v));
        fields.push(alloy_rlp::encode(strip_leading_zeros(r)));
        fields.push(alloy_rlp::encode(strip_leading_zeros(s)));
        Ok(rlp_list(&fields))
    }
}
