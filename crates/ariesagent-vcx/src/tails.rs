//! Revocation tails resolvers
//!
//! Selecting a revocable credential for a proof needs the tails file of its
//! revocation registry. A resolver maps a registry id to that artifact.

use ariesagent_core::{Error, Result, TailsArtifact};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[async_trait::async_trait]
pub trait TailsResolver: Send + Sync {
    fn name(&self) -> &str;

    async fn resolve(&self, rev_reg_id: &str) -> Result<TailsArtifact>;
}

/// Hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    ring::digest::digest(&ring::digest::SHA256, bytes)
        .as_ref()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// File name a registry id is stored under (hex SHA-256 of the id).
pub fn tails_file_name(rev_reg_id: &str) -> String {
    sha256_hex(rev_reg_id.as_bytes())
}

// ---------------------------------------------------------------------------
// AlwaysFail
// ---------------------------------------------------------------------------

/// Resolver for flows that must never touch revocation data.
pub struct AlwaysFail {
    reason: String,
}

impl Default for AlwaysFail {
    fn default() -> Self {
        Self::new("tails file should not be needed")
    }
}

impl AlwaysFail {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait::async_trait]
impl TailsResolver for AlwaysFail {
    fn name(&self) -> &str {
        "always-fail"
    }

    async fn resolve(&self, rev_reg_id: &str) -> Result<TailsArtifact> {
        Err(Error::tails_resolution(rev_reg_id, self.reason.clone()))
    }
}

// ---------------------------------------------------------------------------
// CacheBacked
// ---------------------------------------------------------------------------

/// Pre-registered artifacts, optionally backed by a directory of tails files.
#[derive(Default)]
pub struct CacheBacked {
    entries: DashMap<String, TailsArtifact>,
    dir: Option<PathBuf>,
}

impl CacheBacked {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up misses as `<dir>/<registry id>` files.
    pub fn with_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            entries: DashMap::new(),
            dir: Some(dir.as_ref().to_path_buf()),
        }
    }

    pub fn insert(&self, artifact: TailsArtifact) {
        self.entries.insert(artifact.rev_reg_id.clone(), artifact);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    fn file_path(&self, rev_reg_id: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(tails_file_name(rev_reg_id)))
    }

    /// Store downloaded tails bytes and remember the artifact.
    async fn store(&self, rev_reg_id: &str, bytes: &[u8]) -> Result<TailsArtifact> {
        let path = self
            .file_path(rev_reg_id)
            .ok_or_else(|| Error::tails_resolution(rev_reg_id, "cache has no directory"))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        let artifact = TailsArtifact {
            rev_reg_id: rev_reg_id.to_string(),
            location: path.display().to_string(),
            hash: sha256_hex(bytes),
        };
        self.insert(artifact.clone());
        debug!("cached tails for {} at {} ({} bytes)", rev_reg_id, artifact.location, bytes.len());
        Ok(artifact)
    }

    fn cached(&self, rev_reg_id: &str) -> Option<TailsArtifact> {
        self.entries.get(rev_reg_id).map(|a| a.clone())
    }

    async fn load_from_dir(&self, rev_reg_id: &str) -> Result<Option<TailsArtifact>> {
        let Some(path) = self.file_path(rev_reg_id) else {
            return Ok(None);
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let artifact = TailsArtifact {
                    rev_reg_id: rev_reg_id.to_string(),
                    location: path.display().to_string(),
                    hash: sha256_hex(&bytes),
                };
                self.insert(artifact.clone());
                Ok(Some(artifact))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait::async_trait]
impl TailsResolver for CacheBacked {
    fn name(&self) -> &str {
        "cache"
    }

    async fn resolve(&self, rev_reg_id: &str) -> Result<TailsArtifact> {
        if let Some(artifact) = self.cached(rev_reg_id) {
            return Ok(artifact);
        }
        self.load_from_dir(rev_reg_id)
            .await?
            .ok_or_else(|| Error::tails_resolution(rev_reg_id, "not in tails cache"))
    }
}

// ---------------------------------------------------------------------------
// RemoteFetch
// ---------------------------------------------------------------------------

/// Downloads `<base_url>/<registry id>` into a local cache directory.
pub struct RemoteFetch {
    client: reqwest::Client,
    base_url: url::Url,
    cache: CacheBacked,
}

impl RemoteFetch {
    pub fn new(base_url: &str, cache_dir: impl AsRef<Path>) -> Result<Self> {
        let base_url = url::Url::parse(base_url)
            .map_err(|e| Error::Config(format!("tails base url {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!("tails base url {} cannot be a base", base_url)));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            cache: CacheBacked::with_dir(cache_dir),
        })
    }

    fn tails_url(&self, rev_reg_id: &str) -> url::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(rev_reg_id);
        }
        url
    }

    async fn download(&self, rev_reg_id: &str) -> Result<bytes::Bytes> {
        let url = self.tails_url(rev_reg_id);
        info!("fetching tails for {} from {}", rev_reg_id, url);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::tails_resolution(rev_reg_id, format!("GET {}: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::tails_resolution(
                rev_reg_id,
                format!("GET {} returned {}", url, status),
            ));
        }
        Ok(response.bytes().await?)
    }
}

#[async_trait::async_trait]
impl TailsResolver for RemoteFetch {
    fn name(&self) -> &str {
        "remote"
    }

    async fn resolve(&self, rev_reg_id: &str) -> Result<TailsArtifact> {
        if let Some(artifact) = self.cache.cached(rev_reg_id) {
            return Ok(artifact);
        }
        if let Some(artifact) = self.cache.load_from_dir(rev_reg_id).await? {
            return Ok(artifact);
        }
        let bytes = self.download(rev_reg_id).await?;
        self.cache.store(rev_reg_id, &bytes).await
    }
}
