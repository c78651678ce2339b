//! Open file handles.
//!
//! A pass-through over an already-open host file. The jail was enforced when
//! the handle was opened; each call here only translates host errors.

use std::io::SeekFrom;
use std::path::PathBuf;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use super::error::VfsResult;
use super::host::HostError;
use super::types::FileAttr;

/// Handle returned by [`open_file`](super::VfsOps::open_file).
#[derive(Debug)]
pub struct FileHandle {
    file: File,
    path: PathBuf,
}

impl FileHandle {
    pub(crate) fn new(file: File, path: PathBuf) -> Self {
        Self { file, path }
    }

    pub async fn stat(&self) -> VfsResult<FileAttr> {
        let meta = self
            .file
            .metadata()
            .await
            .map_err(|e| HostError::at("fstat", &self.path, e))?;
        Ok(FileAttr::from_metadata(&meta))
    }

    /// Read into `buf`, at `position` if given, else at the current offset.
    /// Returns the number of bytes read; 0 at EOF.
    pub async fn read(&mut self, buf: &mut [u8], position: Option<u64>) -> VfsResult<usize> {
        self.seek(position, "read").await?;
        let n = self
            .file
            .read(buf)
            .await
            .map_err(|e| HostError::at("read", &self.path, e))?;
        Ok(n)
    }

    /// Write all of `data`, at `position` if given. Returns bytes written.
    pub async fn write(&mut self, data: &[u8], position: Option<u64>) -> VfsResult<usize> {
        self.seek(position, "write").await?;
        self.file
            .write_all(data)
            .await
            .map_err(|e| HostError::at("write", &self.path, e))?;
        Ok(data.len())
    }

    pub async fn truncate(&mut self, len: u64) -> VfsResult<()> {
        self.file
            .set_len(len)
            .await
            .map_err(|e| HostError::at("ftruncate", &self.path, e))?;
        Ok(())
    }

    /// Flush buffered writes and sync data to disk.
    pub async fn flush(&mut self) -> VfsResult<()> {
        self.file
            .flush()
            .await
            .map_err(|e| HostError::at("fsync", &self.path, e))?;
        self.file
            .sync_data()
            .await
            .map_err(|e| HostError::at("fsync", &self.path, e))?;
        Ok(())
    }

    /// Flush pending writes and release the handle.
    pub async fn close(mut self) -> VfsResult<()> {
        self.file
            .shutdown()
            .await
            .map_err(|e| HostError::at("close", &self.path, e))?;
        Ok(())
    }

    async fn seek(&mut self, position: Option<u64>, syscall: &str) -> VfsResult<()> {
        if let Some(position) = position {
            self.file
                .seek(SeekFrom::Start(position))
                .await
                .map_err(|e| HostError::at(syscall, &self.path, e))?;
        }
        Ok(())
    }
}
