//! Artifact store: materializes job inputs and publishes job outputs.

pub mod ipfs;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

pub use ipfs::IpfsArtifactStore;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("invalid artifact locator {0:?}")]
    InvalidLocator(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("output directory {0} contains no files")]
    EmptyOutput(PathBuf),

    #[error("unexpected response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Materialize the artifact behind `locator` inside `dest_dir`.
    async fn fetch(&self, locator: &str, dest_dir: &Path) -> Result<(), ArtifactError>;

    /// Publish the contents of `src_dir` under `target`, returning the new locator.
    async fn publish(&self, src_dir: &Path, target: &str) -> Result<String, ArtifactError>;
}
