//! Clock-in photo storage.
//!
//! Files live under `{upload_dir}/clockins/{uuid}.{ext}` and are referenced
//! by the public path `/uploads/clockins/{uuid}.{ext}`. Saving is a required
//! write and surfaces errors; deleting is best-effort and never fails.

use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, WorkflowError};

const PUBLIC_PREFIX: &str = "/uploads/";
const NAMESPACE: &str = "clockins";

#[derive(Debug, Clone)]
pub struct PhotoStore {
    root: PathBuf,
}

impl PhotoStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        PhotoStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `bytes` under a fresh name and return its public path.
    pub async fn save(&self, bytes: &[u8], extension: &str) -> Result<String> {
        let dir = self.root.join(NAMESPACE);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| WorkflowError::Storage(format!("creating {}: {}", dir.display(), e)))?;
        let name = format!("{}.{}", Uuid::new_v4(), extension);
        let path = dir.join(&name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| WorkflowError::Storage(format!("writing {}: {}", path.display(), e)))?;
        debug!(path = %path.display(), bytes = bytes.len(), "photo saved");
        Ok(format!("{}{}/{}", PUBLIC_PREFIX, NAMESPACE, name))
    }

    /// Map a public path back to the file on disk. Paths outside the upload
    /// root are refused.
    pub fn resolve(&self, public_path: &str) -> Option<PathBuf> {
        let rel = Path::new(public_path.strip_prefix(PUBLIC_PREFIX)?);
        if rel.components().any(|c| !matches!(c, Component::Normal(_))) {
            return None;
        }
        Some(self.root.join(rel))
    }

    /// Remove a stored photo. Missing files and I/O errors are logged and swallowed.
    pub async fn delete(&self, public_path: &str) {
        let Some(path) = self.resolve(public_path) else {
            warn!(photo_path = public_path, "refusing to delete photo outside upload root");
            return;
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "photo deleted"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to delete photo"),
        }
    }
}
