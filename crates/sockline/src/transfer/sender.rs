//! Outbound file streaming.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::io::AsyncReadExt;

use crate::codec::Frame;
use crate::error::{ClientError, FileTransferError};

/// A local file being streamed as one `FileHeader` frame followed by
/// `FileChunk` frames.
///
/// The size is fixed when the source is opened. Every chunk except the last
/// is exactly `chunk_size` bytes, so a file of `S` bytes yields
/// `ceil(S / chunk_size)` chunks.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    remote: String,
    file: tokio::fs::File,
    total: u64,
    sent: u64,
    chunk_size: usize,
}

impl FileSource {
    /// Open `path` for sending to `remote`.
    ///
    /// Fails before anything is written when the source is missing or not a
    /// regular file.
    pub async fn open(
        path: impl AsRef<Path>,
        remote: impl Into<String>,
        chunk_size: usize,
    ) -> Result<Self, FileTransferError> {
        let path = path.as_ref().to_path_buf();
        let not_a_file = || FileTransferError::NotAFile { path: path.clone() };

        let metadata = tokio::fs::metadata(&path).await.map_err(|_| not_a_file())?;
        if !metadata.is_file() {
            return Err(not_a_file());
        }
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| FileTransferError::Io {
                path: path.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            path,
            remote: remote.into(),
            file,
            total: metadata.len(),
            sent: 0,
            chunk_size: chunk_size.max(1),
        })
    }

    /// Local source path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remote destination path.
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Size announced in the header.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Bytes read into chunks so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// The `FileHeader` frame announcing this transfer.
    pub fn header(&self) -> Result<Frame, ClientError> {
        Ok(Frame::file_header(self.remote.clone(), self.total)?)
    }

    /// Read the next chunk, or `None` once `total` bytes have been produced.
    ///
    /// A source that ends early fails with
    /// [`FileTransferError::SourceTruncated`]; bytes appended after opening
    /// are ignored.
    pub async fn next_chunk(&mut self) -> Result<Option<Frame>, ClientError> {
        let remaining = self.total - self.sent;
        if remaining == 0 {
            return Ok(None);
        }

        let want = remaining.min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            let n = self
                .file
                .read(&mut buf[filled..])
                .await
                .map_err(|e| FileTransferError::Io {
                    path: self.path.clone(),
                    message: e.to_string(),
                })?;
            if n == 0 {
                return Err(FileTransferError::SourceTruncated {
                    path: self.path.clone(),
                    expected: self.total,
                    actual: self.sent + filled as u64,
                }
                .into());
            }
            filled += n;
        }

        self.sent += want as u64;
        Ok(Some(Frame::file_chunk(self.remote.clone(), Bytes::from(buf))?))
    }
}
