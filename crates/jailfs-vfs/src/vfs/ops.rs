//! VFS operations trait.
//!
//! The backend-agnostic contract. Paths are virtual: `/a/b`, `a/b` and
//! `./a/b` all name the same entry under the backend's root. Every failure
//! is a canonical [`VfsError`](super::VfsError).

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use super::VfsResult;
use super::handle::FileHandle;
use super::stream::{ReadStream, WriteStream};
use super::types::{DirEntry, FileAttr, OpenFlags, ReadStreamOptions, SymlinkTarget, WriteStreamOptions};
use super::watch::{ErrorCallback, EventCallback, WatchHandle};

/// Core VFS operations trait.
#[async_trait]
pub trait VfsOps: Send + Sync {
    // ========================================================================
    // Reading
    // ========================================================================

    /// Get attributes of the path's ultimate target.
    async fn stat(&self, path: &Path) -> VfsResult<FileAttr>;

    /// Check if a path exists.
    ///
    /// `Ok(false)` only when the path is not found; every other failure
    /// (escape, loop, permission) is returned as an error.
    async fn exists(&self, path: &Path) -> VfsResult<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// List entry names of a directory.
    async fn read_dir(&self, path: &Path) -> VfsResult<Vec<String>>;

    /// List typed entries of a directory, sorted by name. Entries that are
    /// not files, directories or symlinks are omitted.
    async fn read_dirent(&self, path: &Path) -> VfsResult<Vec<DirEntry>>;

    /// Read entire file contents.
    async fn read_file(&self, path: &Path) -> VfsResult<Vec<u8>>;

    /// Stream file contents. Returns immediately; open errors arrive as the
    /// stream's only item.
    fn read_stream(
        &self,
        path: &Path,
        options: ReadStreamOptions,
        cancel: Option<CancellationToken>,
    ) -> ReadStream;

    /// Read a symbolic link's target as a virtual path.
    async fn read_symlink(&self, path: &Path) -> VfsResult<PathBuf>;

    /// Fully resolve a path and return it as a virtual path.
    async fn real_path(&self, path: &Path) -> VfsResult<PathBuf>;

    // ========================================================================
    // Writing
    // ========================================================================

    /// Create or overwrite a file.
    async fn write_file(&self, path: &Path, data: &[u8]) -> VfsResult<()>;

    /// Append to a file, creating it if missing.
    async fn append_file(&self, path: &Path, data: &[u8]) -> VfsResult<()>;

    /// Stream into a file. Returns immediately; open errors surface on the
    /// first write or on close.
    fn write_stream(
        &self,
        path: &Path,
        options: WriteStreamOptions,
        cancel: Option<CancellationToken>,
    ) -> WriteStream;

    /// Copy a file. With `overwrite == false` an existing destination fails
    /// `EEXIST`.
    async fn copy_file(&self, from: &Path, to: &Path, overwrite: bool) -> VfsResult<()>;

    /// Recursively copy a directory to a new path.
    async fn copy_dir(&self, from: &Path, to: &Path) -> VfsResult<()>;

    /// Remove a file or symlink (the link itself, never its target).
    async fn remove_file(&self, path: &Path) -> VfsResult<()>;

    /// Remove a directory, optionally with its contents.
    async fn remove_dir(&self, path: &Path, recursive: bool) -> VfsResult<()>;

    /// Rename a file or directory.
    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()>;

    /// Create one directory level.
    async fn mkdir(&self, path: &Path) -> VfsResult<()>;

    /// Create a symbolic link at `path` pointing to `target`.
    async fn symlink(&self, path: &Path, target: &Path, style: SymlinkTarget) -> VfsResult<()>;

    /// Open a file for handle-based I/O.
    async fn open_file(&self, path: &Path, flags: OpenFlags) -> VfsResult<FileHandle>;

    // ========================================================================
    // Watching
    // ========================================================================

    /// Watch for changes whose virtual path matches `pattern`.
    fn watch(
        &self,
        pattern: &str,
        on_event: EventCallback,
        on_error: ErrorCallback,
    ) -> VfsResult<WatchHandle>;

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Returns true if this filesystem is read-only.
    fn read_only(&self) -> bool;
}
