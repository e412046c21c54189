//! Test doubles for the agent's external collaborators.
//!
//! Every double records what it was asked to do so tests can assert on
//! ordering, arguments and side effects without a chain, a bus, IPFS or Docker.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use gpu_node_agent::artifact::{ArtifactError, ArtifactStore};
use gpu_node_agent::bus::{BusError, DispatchChannel, JobInbox, StatusChannel};
use gpu_node_agent::identity::{AgentCredential, AgentIdentity};
use gpu_node_agent::job::{JobDescriptor, JobStatus};
use gpu_node_agent::ledger::{LedgerClient, LedgerError};
use gpu_node_agent::stats::AgentStats;
use gpu_node_agent::status::{StatusEvent, StatusPublisher};
use gpu_node_agent::worker::{ExecutionEngine, ExecutionError, JobLifecycleController};

pub const TEST_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

pub fn test_identity() -> AgentIdentity {
    AgentCredential::from_hex(TEST_KEY)
        .unwrap()
        .identity()
        .clone()
}

pub fn job(id: &str) -> JobDescriptor {
    JobDescriptor {
        job_id: id.to_string(),
        container_image: "registry.example/trainer:1".to_string(),
        input_locator: format!("ipfs://input-{}", id),
        output_target: format!("results/{}", id),
    }
}

pub fn job_payload(id: &str) -> Vec<u8> {
    serde_json::to_vec(&job(id)).unwrap()
}

/// Poll `cond` every 10ms until it holds or `timeout` elapses.
pub async fn wait_for<F>(timeout: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// =============================================================================
// Ledger
// =============================================================================

#[derive(Default)]
pub struct MockLedger {
    pub registrations: Mutex<Vec<(String, u64)>>,
    pub heartbeat_attempts: AtomicUsize,
    pub heartbeats_confirmed: AtomicUsize,
    pub fail_register: AtomicBool,
    pub fail_heartbeats: AtomicBool,
    heartbeat_delay: Option<Duration>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_registration() -> Self {
        let ledger = Self::default();
        ledger.fail_register.store(true, Ordering::SeqCst);
        ledger
    }

    pub fn with_heartbeat_delay(mut self, delay: Duration) -> Self {
        self.heartbeat_delay = Some(delay);
        self
    }

    pub fn attempts(&self) -> usize {
        self.heartbeat_attempts.load(Ordering::SeqCst)
    }

    pub fn confirmed(&self) -> usize {
        self.heartbeats_confirmed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn register(&self, gpu_model: &str, vram_mib: u64) -> Result<(), LedgerError> {
        self.registrations
            .lock()
            .unwrap()
            .push((gpu_model.to_string(), vram_mib));
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(LedgerError::Reverted("0xdead".to_string()));
        }
        Ok(())
    }

    async fn heartbeat(&self) -> Result<(), LedgerError> {
        self.heartbeat_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.heartbeat_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_heartbeats.load(Ordering::SeqCst) {
            return Err(LedgerError::Rpc {
                code: -32000,
                message: "nonce too low".to_string(),
            });
        }
        self.heartbeats_confirmed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Artifact store
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct PublishedOutput {
    pub target: String,
    pub files: Vec<(String, Vec<u8>)>,
}

#[derive(Default)]
pub struct MockArtifactStore {
    pub fetched: Mutex<Vec<(String, PathBuf)>>,
    pub published: Mutex<Vec<PublishedOutput>>,
    pub fail_fetch: AtomicBool,
    pub fail_publish: AtomicBool,
    pub panic_on_fetch: AtomicBool,
}

impl MockArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetched.lock().unwrap().len()
    }

    pub fn published(&self) -> Vec<PublishedOutput> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactStore for MockArtifactStore {
    async fn fetch(&self, locator: &str, dest_dir: &Path) -> Result<(), ArtifactError> {
        self.fetched
            .lock()
            .unwrap()
            .push((locator.to_string(), dest_dir.to_path_buf()));
        if self.panic_on_fetch.load(Ordering::SeqCst) {
            panic!("gateway client exploded");
        }
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(ArtifactError::Status {
                url: format!("https://gateway.test/ipfs/{}", locator),
                status: 404,
                body: "not found".to_string(),
            });
        }
        tokio::fs::write(dest_dir.join("input"), locator.as_bytes()).await?;
        Ok(())
    }

    async fn publish(&self, src_dir: &Path, target: &str) -> Result<String, ArtifactError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(ArtifactError::Status {
                url: "https://pinning.test/pin".to_string(),
                status: 403,
                body: "quota exceeded".to_string(),
            });
        }

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(src_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                let name = entry.file_name().to_string_lossy().into_owned();
                files.push((name, tokio::fs::read(entry.path()).await?));
            }
        }
        if files.is_empty() {
            return Err(ArtifactError::EmptyOutput(src_dir.to_path_buf()));
        }
        files.sort();

        self.published.lock().unwrap().push(PublishedOutput {
            target: target.to_string(),
            files,
        });
        Ok(format!("ipfs://out-{}", target.replace('/', "-")))
    }
}

// =============================================================================
// Execution engine
// =============================================================================

#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub image: String,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub input_contents: Option<Vec<u8>>,
    pub workspace_existed: bool,
}

#[derive(Debug, Clone)]
pub enum EngineBehavior {
    /// Write `result.txt` into the output directory and exit 0
    Succeed,
    /// Exit with the given non-zero code without writing output
    ExitCode(i32),
    /// Exit 0 without producing any output
    NoOutput,
    Panic,
}

pub struct MockEngine {
    behavior: Mutex<EngineBehavior>,
    delay: Duration,
    pub runs: Mutex<Vec<ExecutionRecord>>,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl MockEngine {
    pub fn new(behavior: EngineBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            delay: Duration::ZERO,
            runs: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_behavior(&self, behavior: EngineBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    pub fn runs(&self) -> Vec<ExecutionRecord> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionEngine for MockEngine {
    async fn run(
        &self,
        image: &str,
        input_dir: &Path,
        output_dir: &Path,
    ) -> Result<(), ExecutionError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        self.runs.lock().unwrap().push(ExecutionRecord {
            image: image.to_string(),
            input_dir: input_dir.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            input_contents: std::fs::read(input_dir.join("input")).ok(),
            workspace_existed: input_dir.is_dir() && output_dir.is_dir(),
        });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let behavior = self.behavior.lock().unwrap().clone();
        let result = match behavior {
            EngineBehavior::Succeed => {
                tokio::fs::write(output_dir.join("result.txt"), format!("processed {}", image))
                    .await
                    .map_err(|source| ExecutionError::Spawn {
                        bin: "mock".to_string(),
                        source,
                    })
            }
            EngineBehavior::ExitCode(code) => Err(ExecutionError::NonZeroExit(code)),
            EngineBehavior::NoOutput => Ok(()),
            EngineBehavior::Panic => {
                self.active.fetch_sub(1, Ordering::SeqCst);
                panic!("engine crashed");
            }
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// =============================================================================
// Status channel
// =============================================================================

#[derive(Default)]
pub struct RecordingStatus {
    payloads: Mutex<Vec<Vec<u8>>>,
    pub fail: AtomicBool,
    pub attempts: AtomicUsize,
}

impl RecordingStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.payloads
            .lock()
            .unwrap()
            .iter()
            .map(|p| serde_json::from_slice(p).unwrap())
            .collect()
    }

    pub fn events_for(&self, job_id: &str) -> Vec<StatusEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.job_id == job_id)
            .collect()
    }

    pub fn statuses_for(&self, job_id: &str) -> Vec<JobStatus> {
        self.events_for(job_id).into_iter().map(|e| e.status).collect()
    }

    pub fn terminal_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| e.status.is_terminal())
            .count()
    }
}

#[async_trait]
impl StatusChannel for RecordingStatus {
    async fn publish_status(&self, payload: Vec<u8>) -> Result<(), BusError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(BusError::Publish {
                subject: "agent.status".to_string(),
                reason: "connection reset".to_string(),
            });
        }
        self.payloads.lock().unwrap().push(payload);
        Ok(())
    }
}

// =============================================================================
// Dispatch channel
// =============================================================================

pub struct ChannelDispatch {
    inbox: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    pub subjects: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

impl ChannelDispatch {
    /// Dispatch double plus the sender side used to deliver messages.
    pub fn new() -> (Self, mpsc::Sender<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(64);
        (
            Self {
                inbox: Mutex::new(Some(rx)),
                subjects: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            },
            tx,
        )
    }

    pub fn subscribed_subjects(&self) -> Vec<String> {
        self.subjects.lock().unwrap().clone()
    }
}

#[async_trait]
impl DispatchChannel for ChannelDispatch {
    async fn subscribe(&self, subject: &str) -> Result<JobInbox, BusError> {
        self.subjects.lock().unwrap().push(subject.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(BusError::Subscribe {
                subject: subject.to_string(),
                reason: "permissions violation".to_string(),
            });
        }
        let rx = self
            .inbox
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| BusError::Subscribe {
                subject: subject.to_string(),
                reason: "already subscribed".to_string(),
            })?;
        Ok(ReceiverStream::new(rx).boxed())
    }
}

// =============================================================================
// Wiring
// =============================================================================

/// Controller wired to the given doubles, with workspaces under `root`.
pub fn controller(
    artifacts: Arc<MockArtifactStore>,
    engine: Arc<MockEngine>,
    status: Arc<RecordingStatus>,
    root: &Path,
) -> JobLifecycleController {
    JobLifecycleController::new(
        artifacts,
        engine,
        StatusPublisher::new(test_identity(), status),
        root.to_path_buf(),
    )
    .with_stats(Arc::new(AgentStats::new()))
}
