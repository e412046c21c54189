use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

pub const DEFAULT_RPC_URL: &str = "https://opbnb-testnet-rpc.bnbchain.org";
pub const DEFAULT_CONTRACT_ADDRESS: &str = "0x108f2c400C9828d8044a5F6985f0C9589B90758D";
pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";
pub const DEFAULT_DISPATCH_PREFIX: &str = "jobs.dispatch";
pub const DEFAULT_STATUS_SUBJECT: &str = "agent.status";
pub const DEFAULT_GATEWAY_URL: &str = "https://gateway.pinata.cloud";
pub const DEFAULT_PINNING_URL: &str = "https://api.pinata.cloud/pinning/pinFileToIPFS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Ledger (EVM chain) connection settings.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub rpc_url: String,
    /// Hex-encoded secp256k1 secret key
    pub private_key: SecretString,
    pub contract_address: String,
    /// Queried with `eth_chainId` when unset.
    pub chain_id: Option<u64>,
    /// Estimated with `eth_estimateGas` when unset.
    pub gas_limit: Option<u64>,
    pub receipt_timeout: Duration,
    pub receipt_poll_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            private_key: SecretString::from(String::new()),
            contract_address: DEFAULT_CONTRACT_ADDRESS.to_string(),
            chain_id: None,
            gas_limit: None,
            receipt_timeout: Duration::from_secs(120),
            receipt_poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Dispatch and status channel settings.
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub nats_url: String,
    /// Inbound subject is `<dispatch_prefix>.<agent identity>`.
    pub dispatch_prefix: String,
    /// Shared outbound subject for all agents.
    pub status_subject: String,
    /// Upper bound on a single status publish
    pub publish_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            nats_url: DEFAULT_NATS_URL.to_string(),
            dispatch_prefix: DEFAULT_DISPATCH_PREFIX.to_string(),
            status_subject: DEFAULT_STATUS_SUBJECT.to_string(),
            publish_timeout: Duration::from_secs(5),
        }
    }
}

/// IPFS gateway and pinning service settings.
#[derive(Debug, Clone)]
pub struct ArtifactConfig {
    pub gateway_url: String,
    pub pinning_url: String,
    /// Bearer token for the pinning service. Never sent to the gateway.
    pub api_token: Option<SecretString>,
    /// File name the fetched input is written to inside the input directory.
    pub input_file_name: String,
    pub request_timeout: Duration,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            pinning_url: DEFAULT_PINNING_URL.to_string(),
            api_token: None,
            input_file_name: "input".to_string(),
            request_timeout: Duration::from_secs(300),
        }
    }
}

/// Configuration for Docker-based job execution.
///
/// Jobs run in containers with GPU access, the job workspace bind-mounted
/// at `input_mount` (read-only) and `output_mount`.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Docker CLI binary
    pub docker_bin: PathBuf,
    /// Value for `--gpus` (e.g. "all", "device=0"). Empty disables GPU passthrough.
    pub gpus: String,
    /// Disable network access in container
    pub network_disabled: bool,
    /// Memory limit (e.g., "16g")
    pub memory_limit: Option<String>,
    /// CPU limit (e.g., "4")
    pub cpu_limit: Option<String>,
    pub input_mount: String,
    pub output_mount: String,
    /// Overrides the image's default command when non-empty
    pub command: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            docker_bin: PathBuf::from("docker"),
            gpus: "all".to_string(),
            network_disabled: false,
            memory_limit: None,
            cpu_limit: None,
            input_mount: "/input".to_string(),
            output_mount: "/output".to_string(),
            command: Vec::new(),
        }
    }
}

/// Process-wide agent configuration, built once at startup and handed to
/// each component constructor.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub ledger: LedgerConfig,
    pub bus: BusConfig,
    pub artifacts: ArtifactConfig,
    pub sandbox: SandboxConfig,
    pub nvidia_smi_bin: PathBuf,
    pub heartbeat_interval: Duration,
    pub workspace_root: PathBuf,
    /// Publish a `processing` status before fetching input
    pub emit_processing: bool,
    /// Address for the read-only status API, disabled when `None`
    pub status_addr: Option<SocketAddr>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            ledger: LedgerConfig::default(),
            bus: BusConfig::default(),
            artifacts: ArtifactConfig::default(),
            sandbox: SandboxConfig::default(),
            nvidia_smi_bin: PathBuf::from("nvidia-smi"),
            heartbeat_interval: Duration::from_secs(300),
            workspace_root: std::env::temp_dir().join("gpu-agent-jobs"),
            emit_processing: true,
            status_addr: None,
        }
    }
}

impl AgentConfig {
    /// Reject values that would only fail later, deep inside a running task.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.private_key.expose_secret().trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "AGENT_PRIVATE_KEY",
            });
        }
        if self.ledger.rpc_url.trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "LEDGER_RPC_URL",
            });
        }
        if self.bus.nats_url.trim().is_empty() {
            return Err(ConfigError::Empty { field: "NATS_URL" });
        }
        if self.bus.dispatch_prefix.trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "DISPATCH_SUBJECT_PREFIX",
            });
        }
        if self.bus.status_subject.trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "STATUS_SUBJECT",
            });
        }
        if self.bus.publish_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "STATUS_PUBLISH_TIMEOUT_SECS",
            });
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Zero {
                field: "HEARTBEAT_INTERVAL_SECS",
            });
        }
        if self.ledger.receipt_poll_interval.is_zero() {
            return Err(ConfigError::Zero {
                field: "receipt poll interval",
            });
        }
        Ok(())
    }
}
