use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Per-job scratch directory with `input/` and `output/` children.
///
/// Backed by a [`TempDir`], so the tree is removed when the workspace is
/// dropped even if the job unwinds.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    input: PathBuf,
    output: PathBuf,
}

impl Workspace {
    /// Create a fresh, uniquely named workspace under `root`.
    pub fn allocate(root: &Path, job_id: &str) -> io::Result<Self> {
        std::fs::create_dir_all(root)?;

        let prefix = format!("{}-", sanitize(job_id));
        let dir = tempfile::Builder::new().prefix(&prefix).tempdir_in(root)?;

        let input = dir.path().join("input");
        let output = dir.path().join("output");
        std::fs::create_dir(&input)?;
        std::fs::create_dir(&output)?;

        // Containers may run as an arbitrary uid.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755))?;
            std::fs::set_permissions(&input, std::fs::Permissions::from_mode(0o755))?;
            std::fs::set_permissions(&output, std::fs::Permissions::from_mode(0o777))?;
        }

        Ok(Self { dir, input, output })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn input_dir(&self) -> &Path {
        &self.input
    }

    pub fn output_dir(&self) -> &Path {
        &self.output
    }

    /// Delete the workspace tree off the async runtime.
    pub async fn remove(self) -> io::Result<()> {
        tokio::task::spawn_blocking(move || self.dir.close())
            .await
            .map_err(io::Error::other)?
    }
}

fn sanitize(job_id: &str) -> String {
    let cleaned: String = job_id
        .chars()
        .take(64)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "job".to_string()
    } else {
        cleaned
    }
}
