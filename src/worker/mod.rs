//! Job processing on this node.
//!
//! - **Intake**: reads the per-agent dispatch subject, one job at a time
//! - **Lifecycle**: workspace, fetch, execute, publish, cleanup, terminal status
//! - **Execution**: runs job images in Docker with GPU access
//! - **Heartbeat**: periodic liveness proof to the ledger
//!
//! # Components
//!
//! - [`JobIntake`]: subscription loop, drops undecodable messages
//! - [`JobLifecycleController`]: drives a job to exactly one terminal status
//! - [`DockerExecutor`]: [`ExecutionEngine`] backed by the `docker` CLI
//! - [`Workspace`]: per-job scratch directory, removed on every path
//! - [`HeartbeatSupervisor`]: runs concurrently with job processing
//!
//! # Execution Flow
//!
//! 1. [`JobIntake::run`] decodes the next dispatch message
//! 2. [`JobLifecycleController::run`] allocates a [`Workspace`]
//! 3. Input is fetched into `input/`, the image writes to `output/`
//! 4. `output/` is published and its locator reported as `completed`
//! 5. Any step failure is reported as `failed` with the reason

pub mod executor;
pub mod heartbeat;
pub mod intake;
pub mod lifecycle;
pub mod workspace;

pub use executor::{DockerExecutor, ExecutionEngine, ExecutionError};
pub use heartbeat::HeartbeatSupervisor;
pub use intake::{IntakeExit, JobIntake};
pub use lifecycle::{JobFailure, JobLifecycleController, JobState};
pub use workspace::Workspace;
