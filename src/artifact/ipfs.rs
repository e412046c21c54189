use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use super::{ArtifactError, ArtifactStore};
use crate::config::ArtifactConfig;

/// Where an input artifact lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// Content identifier, optionally followed by a path inside it
    Ipfs(String),
    /// Plain HTTP(S) URL, fetched verbatim
    Url(String),
}

pub fn parse_locator(raw: &str) -> Result<Locator, ArtifactError> {
    let trimmed = raw.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return Ok(Locator::Url(trimmed.to_string()));
    }

    let cid = trimmed.strip_prefix("ipfs://").unwrap_or(trimmed);
    let valid = !cid.is_empty()
        && !cid.starts_with('/')
        && !cid.contains("://")
        && !cid.chars().any(char::is_whitespace);
    if !valid {
        return Err(ArtifactError::InvalidLocator(raw.to_string()));
    }
    Ok(Locator::Ipfs(cid.to_string()))
}

#[derive(Debug, Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

/// Reads inputs through an IPFS HTTP gateway and pins outputs through a
/// pinning service (Pinata-compatible `pinFileToIPFS`).
pub struct IpfsArtifactStore {
    http: reqwest::Client,
    gateway_url: String,
    pinning_url: String,
    api_token: Option<SecretString>,
    input_file_name: String,
}

impl IpfsArtifactStore {
    pub fn new(config: &ArtifactConfig) -> Result<Self, ArtifactError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            gateway_url: config.gateway_url.trim_end_matches('/').to_string(),
            pinning_url: config.pinning_url.clone(),
            api_token: config.api_token.clone(),
            input_file_name: config.input_file_name.clone(),
        })
    }

    fn resolve(&self, locator: &str) -> Result<String, ArtifactError> {
        Ok(match parse_locator(locator)? {
            Locator::Ipfs(cid) => format!("{}/ipfs/{}", self.gateway_url, cid),
            Locator::Url(url) => url,
        })
    }

    /// Only the pinning endpoint sees the token. Input URLs come from dispatch
    /// messages and may point anywhere.
    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => req.bearer_auth(token.expose_secret()),
            None => req,
        }
    }
}

async fn error_for_status(
    url: &str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, ArtifactError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ArtifactError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        body: body.chars().take(512).collect(),
    })
}

/// Regular files under `root`, paired with their `/`-separated relative paths.
pub async fn collect_files(root: &Path) -> Result<Vec<(PathBuf, String)>, ArtifactError> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let relative = path
                    .strip_prefix(root)
                    .map_err(|e| ArtifactError::Malformed(e.to_string()))?
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                files.push((path, relative));
            }
        }
    }

    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

#[async_trait]
impl ArtifactStore for IpfsArtifactStore {
    async fn fetch(&self, locator: &str, dest_dir: &Path) -> Result<(), ArtifactError> {
        let url = self.resolve(locator)?;
        tracing::info!(locator, url = %url, "Downloading input artifact");

        let resp = self.http.get(&url).send().await?;
        let mut resp = error_for_status(&url, resp).await?;

        tokio::fs::create_dir_all(dest_dir).await?;
        let dest = dest_dir.join(&self.input_file_name);
        let mut file = tokio::fs::File::create(&dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = resp.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        tracing::info!(locator, path = %dest.display(), bytes = written, "Input artifact downloaded");
        Ok(())
    }

    async fn publish(&self, src_dir: &Path, target: &str) -> Result<String, ArtifactError> {
        let files = collect_files(src_dir).await?;
        if files.is_empty() {
            return Err(ArtifactError::EmptyOutput(src_dir.to_path_buf()));
        }

        // Common leading folder makes the pinning service wrap everything in one directory.
        let folder = target.trim_matches('/').replace('/', "-");
        let folder = if folder.is_empty() { "output".to_string() } else { folder };

        let mut form = Form::new();
        for (path, relative) in &files {
            let bytes = tokio::fs::read(path).await?;
            let part = Part::bytes(bytes).file_name(format!("{}/{}", folder, relative));
            form = form.part("file", part);
        }
        form = form.text(
            "pinataMetadata",
            serde_json::json!({ "name": target }).to_string(),
        );

        tracing::info!(target, files = files.len(), "Publishing output artifact");

        let resp = self
            .authorize(self.http.post(&self.pinning_url))
            .multipart(form)
            .send()
            .await?;
        let resp = error_for_status(&self.pinning_url, resp).await?;
        let pinned: PinResponse = resp
            .json()
            .await
            .map_err(|e| ArtifactError::Malformed(e.to_string()))?;

        if pinned.ipfs_hash.is_empty() {
            return Err(ArtifactError::Malformed(
                "pinning response has an empty IpfsHash".to_string(),
            ));
        }
        Ok(format!("ipfs://{}", pinned.ipfs_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipfs_scheme() {
        assert_eq!(
            parse_locator("ipfs://QmHash/data.bin").unwrap(),
            Locator::Ipfs("QmHash/data.bin".to_string())
        );
    }

    #[test]
    fn parses_bare_cid() {
        assert_eq!(
            parse_locator(" bafybeigdyr ").unwrap(),
            Locator::Ipfs("bafybeigdyr".to_string())
        );
    }

    #[test]
    fn passes_http_urls_through() {
        assert_eq!(
            parse_locator("https://example.com/in.zip").unwrap(),
            Locator::Url("https://example.com/in.zip".to_string())
        );
    }

    #[test]
    fn rejects_bad_locators() {
        for raw in ["", "ipfs://", "s3://bucket/key", "has space", "/abs/path"] {
            assert!(
                matches!(parse_locator(raw), Err(ArtifactError::InvalidLocator(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn collects_nested_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("logs")).await.unwrap();
        tokio::fs::write(dir.path().join("result.json"), b"{}").await.unwrap();
        tokio::fs::write(dir.path().join("logs/run.txt"), b"ok").await.unwrap();

        let files = collect_files(dir.path()).await.unwrap();
        let names: Vec<&str> = files.iter().map(|(_, rel)| rel.as_str()).collect();
        assert_eq!(names, vec!["logs/run.txt", "result.json"]);
    }

    #[tokio::test]
    async fn publish_rejects_empty_output() {
        let dir = tempfile::tempdir().unwrap();
        let store = IpfsArtifactStore::new(&ArtifactConfig::default()).unwrap();
        let result = store.publish(dir.path(), "bucket/out").await;
        assert!(matches!(result, Err(ArtifactError::EmptyOutput(_))));
    }

    #[tokio::test]
    async fn fetch_rejects_invalid_locator_before_any_io() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("input");
        let store = IpfsArtifactStore::new(&ArtifactConfig::default()).unwrap();
        let result = store.fetch("s3://nope", &dest).await;
        assert!(matches!(result, Err(ArtifactError::InvalidLocator(_))));
        assert!(!dest.exists());
    }
}
