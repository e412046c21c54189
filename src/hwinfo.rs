use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to execute nvidia-smi: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("nvidia-smi exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("no GPU information found")]
    NoGpu,

    #[error("unexpected nvidia-smi output format: {0}")]
    Format(String),

    #[error("failed to parse VRAM value {0:?}")]
    Vram(String),
}

/// GPU model and memory advertised to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GpuInfo {
    pub model: String,
    pub vram_mib: u64,
}

/// Query the first NVIDIA GPU on the host.
pub async fn probe_gpu(nvidia_smi: &Path) -> Result<GpuInfo, ProbeError> {
    let output = Command::new(nvidia_smi)
        .args(["--query-gpu=name,memory.total", "--format=csv,noheader"])
        .output()
        .await?;

    if !output.status.success() {
        return Err(ProbeError::Failed {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
}

/// Parse `"<model>, <N> MiB"` from the first non-empty line.
pub fn parse_nvidia_smi(stdout: &str) -> Result<GpuInfo, ProbeError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or(ProbeError::NoGpu)?;

    let (model, memory) = line
        .rsplit_once(',')
        .ok_or_else(|| ProbeError::Format(line.to_string()))?;
    let model = model.trim();
    if model.is_empty() {
        return Err(ProbeError::Format(line.to_string()));
    }

    let mut parts = memory.split_whitespace();
    let (Some(amount), Some("MiB"), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(ProbeError::Format(memory.trim().to_string()));
    };
    let vram_mib = amount
        .parse::<u64>()
        .map_err(|_| ProbeError::Vram(amount.to_string()))?;

    Ok(GpuInfo {
        model: model.to_string(),
        vram_mib,
    })
}
