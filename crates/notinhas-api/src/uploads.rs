//! Cover image staging.
//!
//! Uploaded bytes are first written to `{dir}/{uuid}` (the staged file) and
//! then renamed to `{uuid}.{ext}`, where the extension comes from the
//! client's original filename. The resulting `uploads/{uuid}.{ext}` string is
//! stored on the post verbatim and served by the static file route.

use std::path::{Path, PathBuf};

use axum::body::Bytes;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::ApiError;

/// URL prefix under which `dir` is served; also the prefix of every cover reference.
pub const PUBLIC_PREFIX: &str = "uploads";

const MAX_EXTENSION_LEN: usize = 16;

/// A file received from the client, not yet on disk.
#[derive(Debug)]
pub struct CoverUpload {
    pub original_filename: String,
    pub bytes: Bytes,
}

/// A file written to disk under a generated name, before its extension is applied.
#[derive(Debug, Clone)]
pub struct StagedUpload {
    pub original_filename: String,
    pub staged_path: String,
}

pub struct UploadStore {
    dir: PathBuf,
    max_bytes: usize,
}

impl UploadStore {
    pub async fn new(dir: PathBuf, max_bytes: usize) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        info!("Upload directory: {}", dir.display());
        Ok(Self { dir, max_bytes })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Write the cover to disk and return the reference to store on the post.
    pub async fn store(&self, upload: CoverUpload) -> Result<String, ApiError> {
        if upload.bytes.len() > self.max_bytes {
            return Err(ApiError::validation(format!(
                "cover image exceeds {} bytes",
                self.max_bytes
            )));
        }
        // Reject a bad extension before anything touches the disk.
        extension_of(&upload.original_filename)?;

        let staged = self.stage(&upload).await?;
        let stored = self.promote(&staged).await?;

        info!("Stored cover {} ({} bytes)", stored, upload.bytes.len());
        Ok(stored)
    }

    /// Rename a staged file to its stored name. On failure the staged file is
    /// removed so nothing unreferenced stays behind.
    async fn promote(&self, staged: &StagedUpload) -> Result<String, ApiError> {
        let stored = stored_path(staged)?;
        let from = self.disk_path(&staged.staged_path)?;
        let to = self.disk_path(&stored)?;

        if let Err(e) = tokio::fs::rename(&from, &to).await {
            error!("Failed to rename {} to {}: {}", from.display(), to.display(), e);
            self.discard(&staged.staged_path).await;
            return Err(ApiError::Storage(e.into()));
        }
        Ok(stored)
    }

    async fn stage(&self, upload: &CoverUpload) -> Result<StagedUpload, ApiError> {
        let staged_path = format!("{}/{}", PUBLIC_PREFIX, Uuid::new_v4());
        let file_path = self.disk_path(&staged_path)?;

        let mut file = tokio::fs::File::create(&file_path).await.map_err(|e| {
            error!("Failed to create file {}: {}", file_path.display(), e);
            ApiError::Storage(e.into())
        })?;
        file.write_all(&upload.bytes).await.map_err(|e| {
            error!("Failed to write file {}: {}", file_path.display(), e);
            ApiError::Storage(e.into())
        })?;
        file.flush().await.map_err(|e| ApiError::Storage(e.into()))?;

        Ok(StagedUpload {
            original_filename: upload.original_filename.clone(),
            staged_path,
        })
    }

    /// Best-effort removal of a cover, staged or stored, that no post will reference.
    pub async fn discard(&self, reference: &str) {
        let Ok(path) = self.disk_path(reference) else {
            return;
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => info!("Discarded unused cover {}", reference),
            Err(e) => warn!("Could not discard cover {}: {}", reference, e),
        }
    }

    /// Map a reference back to its location on disk, refusing anything that
    /// could escape the upload directory.
    fn disk_path(&self, reference: &str) -> Result<PathBuf, ApiError> {
        let name = reference
            .strip_prefix(PUBLIC_PREFIX)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|name| !name.is_empty() && !name.contains(['/', '\\']) && !name.contains(".."))
            .ok_or_else(|| ApiError::Storage(anyhow::anyhow!("bad upload reference '{}'", reference)))?;
        Ok(self.dir.join(name))
    }
}

/// Text after the last `.` of the original filename, or the whole name when
/// it has no dot.
pub fn extension_of(filename: &str) -> Result<&str, ApiError> {
    let ext = filename.rsplit('.').next().unwrap_or_default();
    if ext.is_empty() || ext.len() > MAX_EXTENSION_LEN || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ApiError::validation(format!(
            "cover image '{}' has an unusable extension",
            filename
        )));
    }
    Ok(ext)
}

/// `staged_path + "." + extension_of(original_filename)`.
pub fn stored_path(staged: &StagedUpload) -> Result<String, ApiError> {
    let ext = extension_of(&staged.original_filename)?;
    Ok(format!("{}.{}", staged.staged_path, ext))
}
