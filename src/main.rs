use clap::{ArgAction, Parser, ValueEnum};
use secrecy::{ExposeSecret, SecretString};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use gpu_node_agent::agent::{Agent, Collaborators};
use gpu_node_agent::artifact::IpfsArtifactStore;
use gpu_node_agent::bus::NatsBus;
use gpu_node_agent::config::{
    AgentConfig, ArtifactConfig, BusConfig, LedgerConfig, SandboxConfig, DEFAULT_CONTRACT_ADDRESS,
    DEFAULT_DISPATCH_PREFIX, DEFAULT_GATEWAY_URL, DEFAULT_NATS_URL, DEFAULT_PINNING_URL,
    DEFAULT_RPC_URL, DEFAULT_STATUS_SUBJECT,
};
use gpu_node_agent::error::{AgentError, Result};
use gpu_node_agent::hwinfo::probe_gpu;
use gpu_node_agent::identity::AgentCredential;
use gpu_node_agent::ledger::EthLedgerClient;
use gpu_node_agent::shutdown::install_shutdown_handler;
use gpu_node_agent::worker::DockerExecutor;

#[derive(Parser, Debug)]
#[command(name = "gpu-node-agent")]
#[command(version)]
#[command(about = "Node agent for a decentralized GPU compute marketplace")]
struct Args {
    // === Identity / Ledger ===
    /// Hex-encoded secp256k1 secret key (optional 0x prefix)
    #[arg(long, env = "AGENT_PRIVATE_KEY", hide_env_values = true, value_parser = parse_secret)]
    private_key: SecretString,

    /// EVM JSON-RPC endpoint
    #[arg(long, env = "LEDGER_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,

    /// Reputation contract address
    #[arg(long, env = "REPUTATION_CONTRACT_ADDRESS", default_value = DEFAULT_CONTRACT_ADDRESS)]
    contract_address: String,

    /// Chain id (queried from the endpoint when omitted)
    #[arg(long, env = "LEDGER_CHAIN_ID")]
    chain_id: Option<u64>,

    /// Fixed gas limit (estimated when omitted)
    #[arg(long, env = "LEDGER_GAS_LIMIT")]
    gas_limit: Option<u64>,

    /// Seconds to wait for a transaction receipt
    #[arg(long, env = "LEDGER_RECEIPT_TIMEOUT_SECS", default_value = "120")]
    receipt_timeout_secs: u64,

    /// Seconds between liveness heartbeats
    #[arg(long, env = "HEARTBEAT_INTERVAL_SECS", default_value = "300")]
    heartbeat_interval_secs: u64,

    // === Message bus ===
    #[arg(long, env = "NATS_URL", default_value = DEFAULT_NATS_URL)]
    nats_url: String,

    /// Jobs arrive on "<prefix>.<agent address>"
    #[arg(long, env = "DISPATCH_SUBJECT_PREFIX", default_value = DEFAULT_DISPATCH_PREFIX)]
    dispatch_prefix: String,

    #[arg(long, env = "STATUS_SUBJECT", default_value = DEFAULT_STATUS_SUBJECT)]
    status_subject: String,

    /// Seconds before a single status publish is abandoned
    #[arg(long, env = "STATUS_PUBLISH_TIMEOUT_SECS", default_value = "5")]
    status_publish_timeout_secs: u64,

    /// Publish a "processing" status before each job starts
    #[arg(long, env = "EMIT_PROCESSING", default_value_t = true, action = ArgAction::Set)]
    emit_processing: bool,

    // === Artifacts ===
    #[arg(long, env = "IPFS_GATEWAY_URL", default_value = DEFAULT_GATEWAY_URL)]
    ipfs_gateway_url: String,

    #[arg(long, env = "IPFS_PINNING_URL", default_value = DEFAULT_PINNING_URL)]
    ipfs_pinning_url: String,

    /// Bearer token for the pinning service
    #[arg(long, env = "PINATA_JWT", hide_env_values = true, value_parser = parse_secret)]
    pinata_jwt: Option<SecretString>,

    // === Execution ===
    #[arg(long, env = "DOCKER_BIN", default_value = "docker")]
    docker_bin: PathBuf,

    /// Value for docker --gpus; empty disables GPU passthrough
    #[arg(long, env = "CONTAINER_GPUS", default_value = "all")]
    container_gpus: String,

    /// Memory limit for containers (e.g. "16g")
    #[arg(long, env = "CONTAINER_MEMORY_LIMIT")]
    container_memory_limit: Option<String>,

    /// CPU limit for containers (e.g. "4")
    #[arg(long, env = "CONTAINER_CPU_LIMIT")]
    container_cpu_limit: Option<String>,

    /// Run containers with --network=none
    #[arg(long, env = "CONTAINER_NETWORK_DISABLED")]
    container_network_disabled: bool,

    #[arg(long, env = "NVIDIA_SMI_BIN", default_value = "nvidia-smi")]
    nvidia_smi_bin: PathBuf,

    /// Parent directory for per-job workspaces
    #[arg(long, env = "WORKSPACE_ROOT")]
    workspace_root: Option<PathBuf>,

    // === Observability ===
    /// Port for the read-only status API (optional)
    #[arg(long, env = "STATUS_PORT")]
    status_port: Option<u16>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

fn parse_secret(raw: &str) -> std::result::Result<SecretString, std::convert::Infallible> {
    Ok(SecretString::from(raw.to_string()))
}

#[derive(Debug, Clone, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl Args {
    fn into_config(self) -> AgentConfig {
        let defaults = AgentConfig::default();
        AgentConfig {
            ledger: LedgerConfig {
                rpc_url: self.rpc_url,
                private_key: self.private_key,
                contract_address: self.contract_address,
                chain_id: self.chain_id,
                gas_limit: self.gas_limit,
                receipt_timeout: Duration::from_secs(self.receipt_timeout_secs),
                ..LedgerConfig::default()
            },
            bus: BusConfig {
                nats_url: self.nats_url,
                dispatch_prefix: self.dispatch_prefix,
                status_subject: self.status_subject,
                publish_timeout: Duration::from_secs(self.status_publish_timeout_secs),
            },
            artifacts: ArtifactConfig {
                gateway_url: self.ipfs_gateway_url,
                pinning_url: self.ipfs_pinning_url,
                api_token: self
                    .pinata_jwt
                    .filter(|t| !t.expose_secret().trim().is_empty()),
                ..ArtifactConfig::default()
            },
            sandbox: SandboxConfig {
                docker_bin: self.docker_bin,
                gpus: self.container_gpus,
                network_disabled: self.container_network_disabled,
                memory_limit: self.container_memory_limit,
                cpu_limit: self.container_cpu_limit,
                ..SandboxConfig::default()
            },
            nvidia_smi_bin: self.nvidia_smi_bin,
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            workspace_root: self.workspace_root.unwrap_or(defaults.workspace_root),
            emit_processing: self.emit_processing,
            status_addr: self
                .status_port
                .map(|port| SocketAddr::from(([0, 0, 0, 0], port))),
        }
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(config: AgentConfig) -> Result<()> {
    config.validate()?;

    let credential = AgentCredential::from_secret(&config.ledger.private_key)?;
    let identity = credential.identity().clone();
    tracing::info!(identity = %identity, "Agent identity derived");

    let gpu = probe_gpu(&config.nvidia_smi_bin).await?;
    tracing::info!(gpu_model = %gpu.model, vram_mib = gpu.vram_mib, "GPU detected");

    let executor = DockerExecutor::new(config.sandbox.clone());
    let docker_version = executor.verify().await?;
    tracing::info!(version = %docker_version, "Docker daemon reachable");

    let ledger = EthLedgerClient::connect(&config.ledger, &credential)
        .await
        .map_err(AgentError::Ledger)?;
    let bus = Arc::new(NatsBus::connect(&config.bus.nats_url, config.bus.status_subject.clone()).await?);
    let artifacts = IpfsArtifactStore::new(&config.artifacts)?;

    let shutdown = install_shutdown_handler()
        .map_err(|e| AgentError::Internal(format!("failed to install signal handlers: {e}")))?;

    let collaborators = Collaborators {
        ledger: Arc::new(ledger),
        dispatch: bus.clone(),
        status: bus,
        artifacts: Arc::new(artifacts),
        engine: Arc::new(executor),
    };

    Agent::new(config, identity, gpu, collaborators)
        .run(shutdown)
        .await
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_logging(&args.log_level, &args.log_format);

    match run(args.into_config()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Node agent terminated");
            ExitCode::FAILURE
        }
    }
}
