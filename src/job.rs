use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of a job as seen by status consumers.
///
/// Ordered: a job never moves backwards, and `Completed`/`Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Received,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Received => write!(f, "received"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed job message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("job message field `{0}` is empty")]
    EmptyField(&'static str),
}

/// One unit of work dispatched to this agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub job_id: String,
    #[serde(alias = "image_name")]
    pub container_image: String,
    #[serde(alias = "input_file_cid")]
    pub input_locator: String,
    #[serde(alias = "output_path")]
    pub output_target: String,
}

impl JobDescriptor {
    /// Decode a dispatch message. Unknown fields are ignored; missing fields
    /// or a blank `job_id`/`container_image` reject the message.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let job: JobDescriptor = serde_json::from_slice(payload)?;
        if job.job_id.trim().is_empty() {
            return Err(DecodeError::EmptyField("job_id"));
        }
        if job.container_image.trim().is_empty() {
            return Err(DecodeError::EmptyField("container_image"));
        }
        Ok(job)
    }
}
