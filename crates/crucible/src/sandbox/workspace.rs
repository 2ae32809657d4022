//! Per-submission workspace lifecycle.
//!
//! A workspace is an ephemeral, uniquely named directory holding the staged
//! source, the stdin file, any additional files, and compile artifacts. It
//! is owned by exactly one worker and removed on every terminal path.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::sandbox::SandboxError;
use crate::submission::SubmissionId;

/// Name of the file the submission's stdin is staged under
pub const INPUT_FILE_NAME: &str = "input";

/// An ephemeral per-submission directory.
///
/// # Cleanup
///
/// Call [`cleanup()`](Self::cleanup) explicitly on every terminal path. The
/// `Drop` implementation removes the directory as a best-effort backstop
/// (and logs a warning), but explicit cleanup is the primary path — Drop
/// cannot report errors and may race process exit.
#[derive(Debug)]
pub struct Workspace {
    /// Workspace directory, a unique sub-path of the shared root
    path: PathBuf,

    /// Whether the directory still exists
    present: bool,
}

impl Workspace {
    /// Create a fresh workspace under `root` for one submission.
    ///
    /// The root is created if missing; the workspace itself is named
    /// `{submission_id}-{uuid}`, so concurrent creations never collide and
    /// restart reconciliation can tell whether a submission's workspace
    /// survived. The directory is made world-writable so that a child
    /// running under a dropped uid can create compile artifacts in it.
    #[instrument(skip(root))]
    pub async fn create(root: &Path, submission_id: SubmissionId) -> Result<Self, SandboxError> {
        let map_err = |source| SandboxError::WorkspaceCreate {
            path: root.to_path_buf(),
            source,
        };

        tokio::fs::create_dir_all(root).await.map_err(map_err)?;

        let path = root.join(format!("{submission_id}-{}", Uuid::new_v4()));
        tokio::fs::create_dir(&path).await.map_err(map_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o777))
                .await
                .map_err(map_err)?;
        }

        debug!(?path, "workspace created");

        Ok(Self {
            path,
            present: true,
        })
    }

    /// The workspace directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a workspace directory for this submission still exists
    /// under `root`. Workspaces are removed on every terminal path, so a
    /// surviving directory marks an execution that never reached terminal.
    pub async fn exists_for(root: &Path, submission_id: SubmissionId) -> bool {
        let prefix = format!("{submission_id}-");
        let Ok(mut entries) = tokio::fs::read_dir(root).await else {
            return false;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                return true;
            }
        }
        false
    }

    /// Host path of a file inside the workspace.
    ///
    /// Rejects absolute paths and path traversal.
    pub fn file_path(&self, name: &str) -> Result<PathBuf, SandboxError> {
        if name.is_empty() {
            return Err(SandboxError::InvalidPath("empty file name".to_owned()));
        }
        if name.starts_with('/') || name.split('/').any(|part| part == "..") {
            return Err(SandboxError::InvalidPath(format!(
                "path traversal not allowed: {name}"
            )));
        }
        Ok(self.path.join(name))
    }

    /// Write a file into the workspace
    #[instrument(skip(self, content))]
    pub async fn write_file(&self, name: &str, content: &[u8]) -> Result<(), SandboxError> {
        let path = self.file_path(name)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&path, content).await?;
        debug!(?path, len = content.len(), "wrote file to workspace");
        Ok(())
    }

    /// Read a file from the workspace
    pub async fn read_file(&self, name: &str) -> Result<Vec<u8>, SandboxError> {
        let path = self.file_path(name)?;
        Ok(tokio::fs::read(&path).await?)
    }

    /// Check if a file exists in the workspace
    pub async fn file_exists(&self, name: &str) -> Result<bool, SandboxError> {
        let path = self.file_path(name)?;
        Ok(tokio::fs::metadata(&path).await.is_ok())
    }

    /// Decode a base64 zip archive and expand it into the workspace root.
    ///
    /// Entries that would escape the workspace are rejected.
    #[instrument(skip(self, archive))]
    pub async fn expand_archive(&self, archive: &str) -> Result<(), SandboxError> {
        let bytes = BASE64
            .decode(archive.trim())
            .map_err(|e| SandboxError::Archive(format!("invalid base64: {e}")))?;

        let root = self.path.clone();
        tokio::task::spawn_blocking(move || extract_zip(&bytes, &root))
            .await
            .map_err(|e| SandboxError::Archive(format!("extraction task failed: {e}")))??;

        debug!("expanded additional files archive");
        Ok(())
    }

    /// Remove the workspace directory and everything in it
    #[must_use = "cleanup errors should be handled"]
    #[instrument(skip(self))]
    pub async fn cleanup(&mut self) -> Result<(), SandboxError> {
        if !self.present {
            return Ok(());
        }

        tokio::fs::remove_dir_all(&self.path).await?;
        self.present = false;
        debug!(path = ?self.path, "workspace removed");
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.present {
            warn!(
                path = %self.path.display(),
                "Workspace dropped without explicit cleanup; removing as a backstop"
            );
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!(path = %self.path.display(), error = %e, "backstop workspace removal failed");
            }
        }
    }
}

fn extract_zip(bytes: &[u8], root: &Path) -> Result<(), SandboxError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| SandboxError::Archive(format!("invalid zip archive: {e}")))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| SandboxError::Archive(format!("bad zip entry {index}: {e}")))?;

        // enclosed_name rejects absolute paths and `..` components
        let Some(relative) = entry.enclosed_name() else {
            return Err(SandboxError::Archive(format!(
                "zip entry escapes the workspace: {}",
                entry.name()
            )));
        };
        let target = root.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
    }

    Ok(())
}
