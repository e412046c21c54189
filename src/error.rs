use thiserror::Error;

use crate::artifact::ArtifactError;
use crate::bus::BusError;
use crate::config::ConfigError;
use crate::hwinfo::ProbeError;
use crate::identity::IdentityError;
use crate::ledger::LedgerError;
use crate::worker::executor::ExecutionError;

/// Startup-fatal failures. Anything that reaches `main` as an `AgentError`
/// terminates the process with a non-zero exit status.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Identity derivation failed: {0}")]
    Identity(#[from] IdentityError),

    #[error("Hardware probe failed: {0}")]
    HardwareProbe(#[from] ProbeError),

    #[error("Ledger client initialization failed: {0}")]
    Ledger(#[source] LedgerError),

    #[error("Capability registration failed: {0}")]
    Registration(#[source] LedgerError),

    #[error("Message bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Artifact store initialization failed: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Execution engine unavailable: {0}")]
    ExecutionEngine(#[from] ExecutionError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
