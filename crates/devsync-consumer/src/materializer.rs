//! File materializer
//!
//! Applies a job to the sync directory. Downloads are streamed into
//! `<filename>.<id>.tmp` next to the target and renamed into place, so readers
//! of the directory only ever see complete files. Every attempt writes its own
//! temporary file; concurrent downloads of one filename leave whichever
//! finished last. Re-running a download replaces the previous file.

use crate::error::JobError;
use futures::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// User agent sent with every download
pub const USER_AGENT: &str = concat!("DevSync-Consumer/", env!("CARGO_PKG_VERSION"));

/// Suffix of in-progress downloads
pub const TEMP_SUFFIX: &str = ".tmp";

/// Places and removes files under a root directory
#[derive(Debug, Clone)]
pub struct FileMaterializer {
    root: PathBuf,
    client: Client,
}

impl FileMaterializer {
    /// Create a materializer with its own HTTP client
    pub fn new(root: impl Into<PathBuf>, fetch_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(fetch_timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self::with_client(root, client))
    }

    pub fn with_client(root: impl Into<PathBuf>, client: Client) -> Self {
        Self {
            root: root.into(),
            client,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of `filename`
    pub fn target_path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    /// Fresh temporary path for one download attempt
    fn temp_path(&self, filename: &str) -> PathBuf {
        let id = Uuid::new_v4().simple();
        self.root.join(format!("{filename}.{id}{TEMP_SUFFIX}"))
    }

    /// Download `source_url` and atomically place it at `filename`.
    ///
    /// On failure the target is left as it was and the temporary file is
    /// removed on a best-effort basis.
    pub async fn materialize(&self, source_url: &str, filename: &str) -> Result<u64, JobError> {
        let target = self.target_path(filename);
        let temp = self.temp_path(filename);

        let result = self.download_to(source_url, &temp).await;
        let written = match result {
            Ok(written) => written,
            Err(e) => {
                discard_temp(&temp).await;
                return Err(e);
            },
        };

        if let Err(source) = tokio::fs::rename(&temp, &target).await {
            discard_temp(&temp).await;
            return Err(JobError::Rename {
                from: temp,
                to: target,
                source,
            });
        }

        debug!(path = %target.display(), bytes = written, "Materialized file");
        Ok(written)
    }

    async fn download_to(&self, source_url: &str, temp: &Path) -> Result<u64, JobError> {
        let response = self
            .client
            .get(source_url)
            .send()
            .await
            .map_err(|e| JobError::fetch(source_url, e))?;

        if !response.status().is_success() {
            return Err(JobError::fetch(
                source_url,
                format!("HTTP {}", response.status()),
            ));
        }

        let write_err = |source: std::io::Error| JobError::Write {
            path: temp.to_path_buf(),
            source,
        };

        if let Some(parent) = temp.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let mut file = tokio::fs::File::create(temp).await.map_err(write_err)?;
        let mut written = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| JobError::fetch(source_url, e))?;
            file.write_all(&chunk).await.map_err(write_err)?;
            written += chunk.len() as u64;
        }

        file.flush().await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;

        Ok(written)
    }

    /// Delete `filename`; a missing file is an error
    pub async fn remove(&self, filename: &str) -> Result<(), JobError> {
        let target = self.target_path(filename);

        match tokio::fs::remove_file(&target).await {
            Ok(()) => {
                debug!(path = %target.display(), "Removed file");
                Ok(())
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(JobError::FileNotFound(target))
            },
            Err(source) => Err(JobError::Remove {
                path: target,
                source,
            }),
        }
    }
}

async fn discard_temp(temp: &Path) {
    match tokio::fs::remove_file(temp).await {
        Ok(()) => debug!(path = %temp.display(), "Removed temporary file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(e) => warn!(path = %temp.display(), error = %e, "Failed to remove temporary file"),
    }
}
