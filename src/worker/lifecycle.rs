use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use thiserror::Error;
use tracing::Instrument;

use super::executor::ExecutionEngine;
use super::workspace::Workspace;
use crate::artifact::ArtifactStore;
use crate::job::JobDescriptor;
use crate::stats::AgentStats;
use crate::status::{StatusPublisher, StatusUpdate};

/// Progress of one job through the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Received,
    WorkspaceReady,
    InputFetched,
    Executed,
    OutputPublished,
}

/// Why a job ended in `failed`. The message is what gets published.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobFailure {
    #[error("workspace allocation failed: {0}")]
    Workspace(String),

    #[error("input fetch failed: {0}")]
    Fetch(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("output publish failed: {0}")]
    Publish(String),
}

impl JobFailure {
    /// Failure attributed to the step that follows `state`.
    fn during(state: JobState, detail: String) -> Self {
        match state {
            JobState::Received => Self::Workspace(detail),
            JobState::WorkspaceReady => Self::Fetch(detail),
            JobState::InputFetched => Self::Execution(detail),
            JobState::Executed | JobState::OutputPublished => Self::Publish(detail),
        }
    }
}

/// Drives a single job from receipt to a terminal status.
///
/// For every job handed to [`run`](Self::run):
/// 1. Allocates a private workspace
/// 2. Optionally publishes `processing`
/// 3. Fetches input, executes the image, publishes output
/// 4. Removes the workspace
/// 5. Publishes exactly one of `completed` or `failed`
///
/// Step failures, including panics inside a collaborator, never escape.
pub struct JobLifecycleController {
    artifacts: Arc<dyn ArtifactStore>,
    engine: Arc<dyn ExecutionEngine>,
    status: StatusPublisher,
    workspace_root: PathBuf,
    emit_processing: bool,
    stats: Arc<AgentStats>,
}

impl JobLifecycleController {
    pub fn new(
        artifacts: Arc<dyn ArtifactStore>,
        engine: Arc<dyn ExecutionEngine>,
        status: StatusPublisher,
        workspace_root: PathBuf,
    ) -> Self {
        Self {
            artifacts,
            engine,
            status,
            workspace_root,
            emit_processing: true,
            stats: Arc::new(AgentStats::new()),
        }
    }

    pub fn with_processing_status(mut self, emit: bool) -> Self {
        self.emit_processing = emit;
        self
    }

    pub fn with_stats(mut self, stats: Arc<AgentStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Process one job. Returns the output locator on success; the outcome has
    /// already been published by the time this returns.
    pub async fn run(&self, job: JobDescriptor) -> Result<String, JobFailure> {
        tracing::info!(
            job_id = %job.job_id,
            image = %job.container_image,
            input = %job.input_locator,
            "Received job"
        );
        self.stats.job_started(&job.job_id);

        let span = tracing::info_span!("job", job_id = %job.job_id);
        let result = self.drive(&job).instrument(span).await;

        match &result {
            Ok(locator) => {
                tracing::info!(job_id = %job.job_id, output = %locator, "Job completed");
                self.status
                    .report(StatusUpdate::completed(&job.job_id, locator.as_str()))
                    .await;
            }
            Err(failure) => {
                tracing::warn!(job_id = %job.job_id, error = %failure, "Job failed");
                self.status
                    .report(StatusUpdate::failed(&job.job_id, failure.to_string()))
                    .await;
            }
        }

        self.stats.job_finished(result.is_ok());
        result
    }

    async fn drive(&self, job: &JobDescriptor) -> Result<String, JobFailure> {
        let workspace = Workspace::allocate(&self.workspace_root, &job.job_id)
            .map_err(|e| JobFailure::Workspace(e.to_string()))?;
        tracing::debug!(job_id = %job.job_id, path = %workspace.path().display(), "Workspace ready");

        if self.emit_processing {
            self.status
                .report(StatusUpdate::processing(&job.job_id))
                .await;
        }

        let mut state = JobState::WorkspaceReady;
        let outcome = AssertUnwindSafe(self.steps(job, &workspace, &mut state))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                let detail = format!("panicked: {}", panic_message(panic.as_ref()));
                tracing::error!(job_id = %job.job_id, state = ?state, %detail, "Job step panicked");
                Err(JobFailure::during(state, detail))
            }
        };

        let path = workspace.path().to_path_buf();
        if let Err(e) = workspace.remove().await {
            tracing::warn!(job_id = %job.job_id, path = %path.display(), error = %e, "Failed to remove workspace");
        }

        result
    }

    async fn steps(
        &self,
        job: &JobDescriptor,
        workspace: &Workspace,
        state: &mut JobState,
    ) -> Result<String, JobFailure> {
        self.artifacts
            .fetch(&job.input_locator, workspace.input_dir())
            .await
            .map_err(|e| JobFailure::Fetch(e.to_string()))?;
        *state = JobState::InputFetched;
        tracing::debug!(job_id = %job.job_id, "Input fetched");

        self.engine
            .run(
                &job.container_image,
                workspace.input_dir(),
                workspace.output_dir(),
            )
            .await
            .map_err(|e| JobFailure::Execution(e.to_string()))?;
        *state = JobState::Executed;
        tracing::debug!(job_id = %job.job_id, "Execution finished");

        let locator = self
            .artifacts
            .publish(workspace.output_dir(), &job.output_target)
            .await
            .map_err(|e| JobFailure::Publish(e.to_string()))?;
        *state = JobState::OutputPublished;

        Ok(locator)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_messages_name_the_step() {
        assert_eq!(
            JobFailure::Fetch("404".into()).to_string(),
            "input fetch failed: 404"
        );
        assert_eq!(
            JobFailure::Execution("container exited with status code 1".into()).to_string(),
            "execution failed: container exited with status code 1"
        );
        assert_eq!(
            JobFailure::Publish("quota".into()).to_string(),
            "output publish failed: quota"
        );
        assert_eq!(
            JobFailure::Workspace("disk full".into()).to_string(),
            "workspace allocation failed: disk full"
        );
    }

    #[test]
    fn panics_map_to_the_step_in_progress() {
        assert!(matches!(
            JobFailure::during(JobState::WorkspaceReady, String::new()),
            JobFailure::Fetch(_)
        ));
        assert!(matches!(
            JobFailure::during(JobState::InputFetched, String::new()),
            JobFailure::Execution(_)
        ));
        assert!(matches!(
            JobFailure::during(JobState::Executed, String::new()),
            JobFailure::Publish(_)
        ));
    }

    #[test]
    fn extracts_panic_messages() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
