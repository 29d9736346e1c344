// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! On-disk home for generated artifacts, one directory per fingerprint.
//!
//! A stored file is reused only while it is newer than the version marker,
//! which defaults to the modification time of the running executable, so
//! installing a new build invalidates everything written by the old one.

use crate::fingerprint::Fingerprint;
use anyhow::Context;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, warn};

pub struct ArtifactStore {
    dir: PathBuf,
    marker: Option<SystemTime>,
}

pub fn polyfills_file_name(minify: bool) -> &'static str {
    if minify {
        "polyfills.min.js"
    } else {
        "polyfills.js"
    }
}

fn executable_mtime() -> Option<SystemTime> {
    let exe = std::env::current_exe().ok()?;
    std::fs::metadata(exe).and_then(|m| m.modified()).ok()
}

impl ArtifactStore {
    pub fn new(root: impl AsRef<Path>, fingerprint: &Fingerprint) -> Self {
        Self {
            dir: root.as_ref().join(fingerprint.as_str()),
            marker: executable_mtime(),
        }
    }

    /// Override the version marker; `None` treats every stored file as stale.
    pub fn with_marker(mut self, marker: Option<SystemTime>) -> Self {
        self.marker = marker;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Contents of `name` when present and newer than the version marker.
    pub async fn load_fresh(&self, name: &str) -> Option<Bytes> {
        let path = self.path(name);
        let modified = fs::metadata(&path).await.ok()?.modified().ok()?;
        let marker = self.marker?;
        if modified <= marker {
            debug!(path = %path.display(), "stored artifact predates this build");
            return None;
        }
        match fs::read(&path).await {
            Ok(data) => Some(Bytes::from(data)),
            Err(e) => {
                warn!(path = %path.display(), %e, "failed to read stored artifact");
                None
            }
        }
    }

    /// Write `name` atomically (temp file + rename).
    pub async fn store(&self, name: &str, data: &[u8]) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create artifact dir {:?}", self.dir))?;
        let path = self.path(name);
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()));
        fs::write(&tmp, data)
            .await
            .with_context(|| format!("failed to write {:?}", tmp))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to move artifact into {:?}", path))?;
        Ok(path)
    }
}
