//! Per-request workspace: a private temporary directory for uploads.
//!
//! ## Lifetime
//!
//! A [`Workspace`] is acquired before the request body is decoded and is
//! owned by exactly one request. It travels with the request through every
//! stage and finally into the response body, so the directory outlives the
//! renderer. [`Workspace::release`] deletes it; if a stage bails out early
//! (decode error, spawn error, client disconnect) the `Drop` impl performs
//! the same release. The inner `TempDir` is taken on first release, so the
//! directory is removed exactly once whatever the exit path.
//!
//! ## File names
//!
//! Uploaded files keep their original basename because rendered pages may
//! depend on it (`document.location`, relative links between uploads). Only
//! the last path segment of the declared name is used, which keeps every
//! stored path a direct child of the workspace directory.

use crate::error::BridgeError;
use axum::body::Bytes;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Prefix of every workspace directory name.
const WORKSPACE_PREFIX: &str = "kwk";

/// A per-request temporary directory.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl Workspace {
    /// Create a fresh, uniquely named directory under `root` (or the system
    /// temp dir when `None`).
    pub fn acquire(root: Option<&Path>) -> Result<Self, BridgeError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKSPACE_PREFIX);
        let dir = match root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|source| BridgeError::WorkspaceUnavailable { source })?;

        let path = dir.path().to_path_buf();
        debug!("Acquired workspace {}", path.display());
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    /// Directory of this workspace.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path a declared file name is stored at: the workspace joined with its
    /// basename.
    pub fn stored_path(&self, filename: &str) -> Result<PathBuf, BridgeError> {
        let base = basename(filename).ok_or_else(|| BridgeError::MissingFileName {
            name: Some(filename.to_string()),
        })?;
        let path = self.path.join(base);
        debug_assert_eq!(path.parent(), Some(self.path.as_path()));
        Ok(path)
    }

    /// Stream `data` into `<workspace>/basename(filename)`.
    ///
    /// The file is created with create-new semantics: a second upload with the
    /// same basename fails with [`BridgeError::DuplicateFileName`] and never
    /// touches the bytes already stored. Errors of the data stream itself are
    /// reported as [`BridgeError::MalformedRequest`], local I/O failures as
    /// [`BridgeError::WorkspaceUnavailable`].
    pub async fn store<S, E>(&self, filename: &str, data: S) -> Result<PathBuf, BridgeError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        let path = self.stored_path(filename)?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|source| match source.kind() {
                std::io::ErrorKind::AlreadyExists => BridgeError::DuplicateFileName {
                    name: basename(filename).unwrap_or(filename).to_string(),
                },
                _ => BridgeError::WorkspaceUnavailable { source },
            })?;

        let mut data = std::pin::pin!(data);
        let mut written: u64 = 0;
        while let Some(chunk) = data.next().await {
            let chunk = chunk.map_err(|e| BridgeError::MalformedRequest(e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|source| BridgeError::WorkspaceUnavailable { source })?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|source| BridgeError::WorkspaceUnavailable { source })?;

        debug!("Stored {} bytes at {}", written, path.display());
        Ok(path)
    }

    /// Reserve a uniquely named, empty file for renderer output.
    ///
    /// Called after all uploads are stored, so the name can never shadow one.
    pub fn reserve_output(&self, suffix: &str) -> Result<PathBuf, BridgeError> {
        let file = tempfile::Builder::new()
            .prefix("rendered-")
            .suffix(suffix)
            .tempfile_in(&self.path)
            .map_err(|source| BridgeError::WorkspaceUnavailable { source })?;
        file.into_temp_path()
            .keep()
            .map_err(|e| BridgeError::WorkspaceUnavailable { source: e.error })
    }

    /// Recursively delete the workspace.
    ///
    /// Idempotent. Failures are logged and swallowed: by the time a
    /// workspace is released the response has already been decided.
    pub fn release(&mut self) {
        if let Some(dir) = self.dir.take() {
            match dir.close() {
                Ok(()) => debug!("Released workspace {}", self.path.display()),
                Err(e) => warn!("Failed to remove workspace {}: {}", self.path.display(), e),
            }
        }
    }

    /// True until [`Workspace::release`] has run.
    pub fn is_held(&self) -> bool {
        self.dir.is_some()
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.release();
    }
}

/// Last path segment of a declared file name, treating both `/` and `\` as
/// separators. `None` when nothing usable is left.
pub fn basename(name: &str) -> Option<&str> {
    let base = name.rsplit(['/', '\\']).next()?;
    match base {
        "" | "." | ".." => None,
        other => Some(other),
    }
}
