use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use uuid::Uuid;

use crate::config::SandboxConfig;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to spawn {bin}: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("docker daemon unavailable: {0}")]
    Unavailable(String),

    #[error("failed to pull image {image}: {reason}")]
    PullFailed { image: String, reason: String },

    #[error("failed to wait for container {name}: {source}")]
    Wait {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("container exited with status code {0}")]
    NonZeroExit(i32),

    #[error("container process terminated by signal")]
    Terminated,
}

/// Runs one job image against a prepared workspace.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Pull `image`, run it with GPU access and both directories mounted,
    /// wait for a zero exit code and remove the container.
    async fn run(&self, image: &str, input_dir: &Path, output_dir: &Path)
        -> Result<(), ExecutionError>;
}

/// Executes jobs in Docker containers through the `docker` CLI.
///
/// Containers run with:
/// - GPU passthrough (`--gpus`)
/// - Input mounted read-only, output mounted read-write
/// - Dropped capabilities and no privilege escalation
/// - Optional network isolation and memory/CPU limits
#[derive(Debug, Clone)]
pub struct DockerExecutor {
    config: SandboxConfig,
}

impl DockerExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    fn bin(&self) -> String {
        self.config.docker_bin.display().to_string()
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.docker_bin);
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Check that the CLI can reach a daemon; returns the server version.
    pub async fn verify(&self) -> Result<String, ExecutionError> {
        let output = self
            .command()
            .args(["version", "--format", "{{.Server.Version}}"])
            .output()
            .await
            .map_err(|source| ExecutionError::Spawn {
                bin: self.bin(),
                source,
            })?;

        if !output.status.success() {
            return Err(ExecutionError::Unavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Arguments for `docker run`, excluding the binary itself.
    pub fn run_args(&self, name: &str, image: &str, input_dir: &Path, output_dir: &Path) -> Vec<String> {
        let mut args = vec!["run".to_string(), format!("--name={}", name)];

        if !self.config.gpus.is_empty() {
            args.push(format!("--gpus={}", self.config.gpus));
        }

        // Network isolation
        if self.config.network_disabled {
            args.push("--network=none".to_string());
        }

        if let Some(ref limit) = self.config.memory_limit {
            args.push(format!("--memory={}", limit));
        }

        if let Some(ref limit) = self.config.cpu_limit {
            args.push(format!("--cpus={}", limit));
        }

        // Security: drop all capabilities, no new privileges
        args.push("--cap-drop=ALL".to_string());
        args.push("--security-opt=no-new-privileges".to_string());

        args.push("-v".to_string());
        args.push(format!(
            "{}:{}:ro",
            input_dir.display(),
            self.config.input_mount
        ));
        args.push("-v".to_string());
        args.push(format!(
            "{}:{}",
            output_dir.display(),
            self.config.output_mount
        ));

        args.push(image.to_string());
        args.extend(self.config.command.iter().cloned());
        args
    }

    async fn pull(&self, image: &str) -> Result<(), ExecutionError> {
        tracing::info!(image, "Pulling image");

        let output = self
            .command()
            .args(["pull", image])
            .output()
            .await
            .map_err(|source| ExecutionError::Spawn {
                bin: self.bin(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ExecutionError::PullFailed {
                image: image.to_string(),
                reason: if stderr.is_empty() {
                    format!("exit code {:?}", output.status.code())
                } else {
                    stderr
                },
            });
        }
        Ok(())
    }

    async fn start_and_wait(&self, name: &str, args: Vec<String>) -> Result<(), ExecutionError> {
        let mut child = self
            .command()
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecutionError::Spawn {
                bin: self.bin(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (_, _, status) = tokio::join!(
            stream_lines(name, "stdout", stdout),
            stream_lines(name, "stderr", stderr),
            child.wait(),
        );

        let status = status.map_err(|source| ExecutionError::Wait {
            name: name.to_string(),
            source,
        })?;

        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(ExecutionError::NonZeroExit(code)),
            None => Err(ExecutionError::Terminated),
        }
    }

    async fn remove(&self, name: &str) {
        match self.command().args(["rm", "-f", name]).output().await {
            Ok(output) if output.status.success() => {
                tracing::debug!(container = name, "Removed container");
            }
            Ok(output) => {
                tracing::warn!(
                    container = name,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "Failed to remove container"
                );
            }
            Err(e) => {
                tracing::warn!(container = name, error = %e, "Failed to remove container");
            }
        }
    }
}

async fn stream_lines<R>(container: &str, stream: &'static str, reader: Option<R>)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                tracing::info!(container, stream, "{}", line.trim_end_matches(&['\r', '\n'][..]));
            }
            Err(e) => {
                tracing::warn!(container, stream, error = %e, "Discarding unreadable container output");
                // The read end must stay open until EOF or the container gets SIGPIPE.
                let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
                break;
            }
        }
    }
}

#[async_trait]
impl ExecutionEngine for DockerExecutor {
    async fn run(
        &self,
        image: &str,
        input_dir: &Path,
        output_dir: &Path,
    ) -> Result<(), ExecutionError> {
        self.pull(image).await?;

        let name = format!("gpu-agent-{}", Uuid::new_v4());
        let args = self.run_args(&name, image, input_dir, output_dir);
        tracing::info!(container = %name, image, "Starting container");

        let result = self.start_and_wait(&name, args).await;
        self.remove(&name).await;

        match &result {
            Ok(()) => tracing::info!(container = %name, "Container exited successfully"),
            Err(e) => tracing::warn!(container = %name, error = %e, "Container run failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn run_args_with_defaults() {
        let executor = DockerExecutor::new(SandboxConfig::default());
        let args = executor.run_args(
            "gpu-agent-test",
            "demo:latest",
            &PathBuf::from("/tmp/ws/input"),
            &PathBuf::from("/tmp/ws/output"),
        );

        assert_eq!(args[0], "run");
        assert!(args.contains(&"--name=gpu-agent-test".to_string()));
        assert!(args.contains(&"--gpus=all".to_string()));
        assert!(args.contains(&"--cap-drop=ALL".to_string()));
        assert!(args.contains(&"/tmp/ws/input:/input:ro".to_string()));
        assert!(args.contains(&"/tmp/ws/output:/output".to_string()));
        assert!(!args.iter().any(|a| a == "--network=none"));
        assert_eq!(args.last().map(String::as_str), Some("demo:latest"));
    }

    #[test]
    fn run_args_with_limits_and_command() {
        let executor = DockerExecutor::new(SandboxConfig {
            gpus: String::new(),
            network_disabled: true,
            memory_limit: Some("8g".to_string()),
            cpu_limit: Some("2".to_string()),
            command: vec!["python".to_string(), "train.py".to_string()],
            ..SandboxConfig::default()
        });
        let args = executor.run_args(
            "c",
            "trainer:1",
            &PathBuf::from("/in"),
            &PathBuf::from("/out"),
        );

        assert!(!args.iter().any(|a| a.starts_with("--gpus")));
        assert!(args.contains(&"--network=none".to_string()));
        assert!(args.contains(&"--memory=8g".to_string()));
        assert!(args.contains(&"--cpus=2".to_string()));
        let image_pos = args.iter().position(|a| a == "trainer:1").unwrap();
        assert_eq!(&args[image_pos + 1..], &["python", "train.py"]);
    }
}
