//! Inbound file reconstruction.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sockline_core::logging::targets;
use tokio::io::AsyncWriteExt;

use crate::error::FileTransferError;

/// Unique suffix for in-progress files.
static PART_SEQ: AtomicU64 = AtomicU64::new(0);

/// An in-progress receive.
#[derive(Debug)]
struct ReceiveSession {
    remote: String,
    destination: PathBuf,
    part: PathBuf,
    file: tokio::fs::File,
    total: u64,
    received: u64,
}

/// Reconstructs files announced by `FileHeader` frames.
///
/// Bytes land in a hidden `.part` file beside the destination, which is
/// renamed into place once the declared size has arrived. Anything that ends
/// a session early removes the part file, so the destination only ever holds
/// a complete file.
#[derive(Debug, Default)]
pub struct FileReceiver {
    root: Option<PathBuf>,
    session: Option<ReceiveSession>,
    /// Remote path whose remaining chunks are dropped after a local failure.
    discarding: Option<String>,
}

impl FileReceiver {
    /// Create a receiver. With a `root`, remote paths are confined beneath it.
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            root,
            session: None,
            discarding: None,
        }
    }

    /// Whether a session is in progress.
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// `(received, total)` for the active session.
    pub fn progress(&self) -> Option<(u64, u64)> {
        self.session.as_ref().map(|s| (s.received, s.total))
    }

    /// Open a session for `remote` expecting `total` bytes.
    ///
    /// Any active session must have been aborted first. A zero-length file
    /// completes immediately and its final path is returned.
    pub async fn begin(
        &mut self,
        remote: &str,
        total: u64,
    ) -> Result<Option<PathBuf>, FileTransferError> {
        self.discarding = None;

        let destination = match resolve_destination(self.root.as_deref(), remote) {
            Ok(path) => path,
            Err(err) => {
                self.discarding = Some(remote.to_string());
                return Err(err);
            }
        };
        let part = part_path(&destination);

        let opened = async {
            if let Some(parent) = destination.parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::File::create(&part).await
        }
        .await;

        let file = match opened {
            Ok(file) => file,
            Err(e) => {
                self.discarding = Some(remote.to_string());
                return Err(io_error(&destination, &e));
            }
        };

        tracing::debug!(
            target: targets::TRANSFER,
            remote,
            destination = %destination.display(),
            total,
            "receiving file"
        );

        let session = ReceiveSession {
            remote: remote.to_string(),
            destination,
            part,
            file,
            total,
            received: 0,
        };
        if total == 0 {
            return finish(session).await.map(Some);
        }
        self.session = Some(session);
        Ok(None)
    }

    /// Append a chunk to the active session.
    ///
    /// Returns the final path once the declared size has been written.
    pub async fn write_chunk(
        &mut self,
        remote: &str,
        data: &[u8],
    ) -> Result<Option<PathBuf>, FileTransferError> {
        let Some(mut session) = self.session.take() else {
            if self.discarding.as_deref() == Some(remote) {
                tracing::trace!(target: targets::TRANSFER, remote, bytes = data.len(), "dropping chunk of failed transfer");
                return Ok(None);
            }
            return Err(FileTransferError::UnexpectedChunk {
                path: remote.to_string(),
            });
        };

        if session.remote != remote {
            let reason = format!("chunk for {remote} interleaved with active transfer");
            self.discarding = Some(session.remote.clone());
            return Err(discard(session, &reason).await);
        }
        if data.len() as u64 > session.total - session.received {
            return Err(discard(session, "chunk overruns the declared size").await);
        }

        if let Err(e) = session.file.write_all(data).await {
            let err = io_error(&session.destination, &e);
            discard(session, &e.to_string()).await;
            self.discarding = Some(remote.to_string());
            return Err(err);
        }
        session.received += data.len() as u64;

        if session.received == session.total {
            return finish(session).await.map(Some);
        }
        self.session = Some(session);
        Ok(None)
    }

    /// Abandon the active session, deleting its partial output.
    ///
    /// Returns the error describing the abort, or `None` when idle.
    pub async fn abort(&mut self, reason: &str) -> Option<FileTransferError> {
        self.discarding = None;
        let session = self.session.take()?;
        Some(discard(session, reason).await)
    }
}

async fn discard(session: ReceiveSession, reason: &str) -> FileTransferError {
    let ReceiveSession {
        destination,
        part,
        file,
        total,
        received,
        ..
    } = session;
    drop(file);
    remove_part(&part).await;

    tracing::warn!(
        target: targets::TRANSFER,
        destination = %destination.display(),
        received,
        total,
        reason,
        "file transfer aborted"
    );

    FileTransferError::Aborted {
        path: destination,
        received,
        total,
        reason: reason.to_string(),
    }
}

async fn finish(session: ReceiveSession) -> Result<PathBuf, FileTransferError> {
    let ReceiveSession {
        destination,
        part,
        mut file,
        total,
        ..
    } = session;

    let finalized = async {
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        if let Err(e) = tokio::fs::rename(&part, &destination).await {
            // Platforms that refuse to rename over an existing file.
            if !tokio::fs::try_exists(&destination).await.unwrap_or(false) {
                return Err(e);
            }
            tokio::fs::remove_file(&destination).await?;
            tokio::fs::rename(&part, &destination).await?;
        }
        io::Result::Ok(())
    }
    .await;

    if let Err(e) = finalized {
        remove_part(&part).await;
        return Err(io_error(&destination, &e));
    }

    tracing::debug!(
        target: targets::TRANSFER,
        destination = %destination.display(),
        total,
        "file received"
    );
    Ok(destination)
}

/// Map a remote path to a local destination.
///
/// Without a root the path is used as given. With a root, the path must be
/// relative and may not climb out of it.
pub fn resolve_destination(root: Option<&Path>, remote: &str) -> Result<PathBuf, FileTransferError> {
    let rejected = |reason: &str| FileTransferError::PathRejected {
        path: remote.to_string(),
        reason: reason.to_string(),
    };

    if remote.is_empty() {
        return Err(rejected("empty path"));
    }
    let candidate = Path::new(remote);
    if candidate.file_name().is_none() {
        return Err(rejected("path has no file name"));
    }

    let Some(root) = root else {
        return Ok(candidate.to_path_buf());
    };

    if candidate.has_root() {
        return Err(rejected("absolute paths are not allowed"));
    }
    for component in candidate.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => return Err(rejected("parent directory references are not allowed")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(rejected("absolute paths are not allowed"));
            }
        }
    }
    Ok(root.join(candidate))
}

fn part_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let seq = PART_SEQ.fetch_add(1, Ordering::Relaxed);
    destination.with_file_name(format!(".{name}.{}-{seq}.part", std::process::id()))
}

async fn remove_part(part: &Path) {
    if let Err(e) = tokio::fs::remove_file(part).await
        && e.kind() != io::ErrorKind::NotFound
    {
        tracing::warn!(target: targets::TRANSFER, part = %part.display(), error = %e, "failed to remove partial file");
    }
}

fn io_error(path: &Path, err: &io::Error) -> FileTransferError {
    FileTransferError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
