//! Local filesystem backend.
//!
//! Provides access to a real directory tree, jailed under its root. Every
//! path goes through [`PathResolver`], so symlinks inside the tree may point
//! anywhere without letting an operation reach outside the root.

use async_trait::async_trait;
use futures::FutureExt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::BackendConfig;
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::handle::FileHandle;
use crate::vfs::host;
use crate::vfs::ops::VfsOps;
use crate::vfs::resolve::{BaseDirectory, Follow, PathResolver, VirtualStyle};
use crate::vfs::stream::{OpenedFile, PendingOpen, ReadStream, WriteStream};
use crate::vfs::types::{
    DEFAULT_CHUNK_SIZE, DirEntry, FileAttr, FileType, OpenFlags, ReadStreamOptions, SymlinkTarget,
    WriteStreamOptions,
};
use crate::vfs::watch::{
    ChangeNotifier, ErrorCallback, EventCallback, NotifyWatcher, WatchHandle, WatchMultiplexer,
};

/// Local filesystem backend.
///
/// All operations are relative to the root. For example, if the root is
/// `/home/amy/project`, then `read_file("src/main.rs")` reads
/// `/home/amy/project/src/main.rs`.
#[derive(Debug)]
pub struct LocalBackend {
    resolver: PathResolver,
    read_only: bool,
    chunk_size: usize,
    watcher: WatchMultiplexer,
}

impl LocalBackend {
    /// Create a backend rooted at `root`, watching through `notify`.
    ///
    /// The root is canonicalized once here (e.g. macOS `/tmp` →
    /// `/private/tmp`) and never re-resolved.
    pub fn new(root: impl AsRef<Path>) -> VfsResult<Self> {
        Self::with_notifier(root, Arc::new(NotifyWatcher::default()))
    }

    /// Create a backend with a custom change notifier.
    pub fn with_notifier(
        root: impl AsRef<Path>,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> VfsResult<Self> {
        let base = Arc::new(BaseDirectory::new(root)?);
        Ok(Self {
            resolver: PathResolver::new(Arc::clone(&base)),
            read_only: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            watcher: WatchMultiplexer::new(base, notifier),
        })
    }

    /// Create a backend from loaded configuration.
    pub fn from_config(config: &BackendConfig) -> VfsResult<Self> {
        let notifier = NotifyWatcher::new(config.watch.poll_interval());
        let mut backend = Self::with_notifier(&config.root, Arc::new(notifier))?;
        backend.read_only = config.read_only;
        backend.chunk_size = config.chunk_size.max(1);
        Ok(backend)
    }

    /// Set whether this filesystem is read-only.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Get the canonical root path.
    pub fn root(&self) -> &Path {
        self.resolver.base().path()
    }

    /// Read-stream options using this backend's chunk size.
    pub fn read_options(&self) -> ReadStreamOptions {
        ReadStreamOptions {
            chunk_size: self.chunk_size,
            ..Default::default()
        }
    }

    /// The watch multiplexer, for inspecting subscription state.
    pub fn watcher(&self) -> &WatchMultiplexer {
        &self.watcher
    }

    async fn resolve(&self, path: &Path, follow: Follow) -> VfsResult<PathBuf> {
        self.resolver.resolve(path, follow).await
    }

    /// Check if write operations are allowed.
    fn check_writable(&self) -> VfsResult<()> {
        if self.read_only {
            Err(VfsError::permission_denied("filesystem is read-only"))
        } else {
            Ok(())
        }
    }

    async fn require_dir(path: &Path) -> VfsResult<()> {
        let meta = host::stat(path).await?;
        if meta.is_dir() {
            Ok(())
        } else {
            Err(VfsError::not_a_directory(format!(
                "not a directory: {}",
                path.display()
            )))
        }
    }

    /// Copy the contents of `src` into the existing directory `dst`.
    ///
    /// Entries are typed without following links, so nested symlinks are
    /// recreated as links and never traversed.
    async fn copy_tree(src: PathBuf, dst: PathBuf) -> VfsResult<()> {
        let mut pending = vec![(src, dst)];
        while let Some((src, dst)) = pending.pop() {
            for (name, file_type) in host::readdir(&src).await? {
                let from = src.join(&name);
                let to = dst.join(&name);
                match FileType::from_std(file_type) {
                    Some(FileType::Directory) => {
                        host::mkdir(&to).await?;
                        pending.push((from, to));
                    }
                    Some(FileType::File) => {
                        host::copy(&from, &to).await?;
                    }
                    Some(FileType::Symlink) => {
                        let target = host::readlink(&from).await?;
                        host::symlink(&target, &to).await?;
                    }
                    None => {
                        tracing::debug!(path = %from.display(), "skipping special file during copy");
                    }
                }
            }
        }
        Ok(())
    }
}

/// Lexically resolve `.` and `..` in an absolute path.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[async_trait]
impl VfsOps for LocalBackend {
    async fn stat(&self, path: &Path) -> VfsResult<FileAttr> {
        let link = self.resolve(path, Follow::NoFinal).await?;
        let meta = host::lstat(&link).await?;
        if !meta.file_type().is_symlink() {
            return Ok(FileAttr::from_metadata(&meta));
        }

        let real = self.resolve(path, Follow::Final).await?;
        let meta = host::stat(&real).await?;
        let mut attr = FileAttr::from_metadata(&meta);
        attr.is_symlink = true;
        Ok(attr)
    }

    async fn read_dir(&self, path: &Path) -> VfsResult<Vec<String>> {
        let real = self.resolve(path, Follow::Final).await?;
        let mut names: Vec<String> = host::readdir(&real)
            .await?
            .into_iter()
            .map(|(name, _)| name.to_string_lossy().into_owned())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn read_dirent(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let real = self.resolve(path, Follow::Final).await?;
        let mut entries: Vec<DirEntry> = host::readdir(&real)
            .await?
            .into_iter()
            .filter_map(|(name, file_type)| {
                let kind = FileType::from_std(file_type)?;
                Some(DirEntry::new(name.to_string_lossy(), kind))
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read_file(&self, path: &Path) -> VfsResult<Vec<u8>> {
        let real = self.resolve(path, Follow::Final).await?;
        Ok(host::read(&real).await?)
    }

    fn read_stream(
        &self,
        path: &Path,
        options: ReadStreamOptions,
        cancel: Option<CancellationToken>,
    ) -> ReadStream {
        let resolver = self.resolver.clone();
        let path = path.to_path_buf();
        let open: PendingOpen = async move {
            let real = resolver.resolve(&path, Follow::Final).await?;
            let file = host::open(&real, tokio::fs::OpenOptions::new().read(true)).await?;
            Ok::<_, VfsError>(OpenedFile { file, path: real })
        }
        .boxed();
        ReadStream::new(open, options, cancel.unwrap_or_default())
    }

    async fn read_symlink(&self, path: &Path) -> VfsResult<PathBuf> {
        let link = self.resolve(path, Follow::NoFinal).await?;
        let target = host::readlink(&link).await?;
        let absolute = match link.parent() {
            Some(parent) if target.is_relative() => parent.join(&target),
            _ => target,
        };
        self.resolver
            .base()
            .to_virtual(&normalize(&absolute), VirtualStyle::Absolute)
    }

    async fn real_path(&self, path: &Path) -> VfsResult<PathBuf> {
        let real = self.resolve(path, Follow::Final).await?;
        // Resolution tolerates a missing final segment; the target must exist.
        host::lstat(&real).await?;
        self.resolver.base().to_virtual(&real, VirtualStyle::Absolute)
    }

    async fn write_file(&self, path: &Path, data: &[u8]) -> VfsResult<()> {
        self.check_writable()?;
        let real = self.resolve(path, Follow::Final).await?;
        Ok(host::write(&real, data).await?)
    }

    async fn append_file(&self, path: &Path, data: &[u8]) -> VfsResult<()> {
        self.check_writable()?;
        let real = self.resolve(path, Follow::Final).await?;
        Ok(host::append(&real, data).await?)
    }

    fn write_stream(
        &self,
        path: &Path,
        options: WriteStreamOptions,
        cancel: Option<CancellationToken>,
    ) -> WriteStream {
        let cancel = cancel.unwrap_or_default();
        if let Err(e) = self.check_writable() {
            return WriteStream::new(futures::future::ready(Err::<OpenedFile, _>(e)).boxed(), cancel);
        }

        let resolver = self.resolver.clone();
        let path = path.to_path_buf();
        let open: PendingOpen = async move {
            let real = resolver.resolve(&path, Follow::Final).await?;
            let mut opts = tokio::fs::OpenOptions::new();
            opts.create(true);
            if options.append {
                opts.append(true);
            } else {
                opts.write(true).truncate(true);
            }
            let file = host::open(&real, &opts).await?;
            Ok::<_, VfsError>(OpenedFile { file, path: real })
        }
        .boxed();
        WriteStream::new(open, cancel)
    }

    async fn copy_file(&self, from: &Path, to: &Path, overwrite: bool) -> VfsResult<()> {
        self.check_writable()?;
        let src = self.resolve(from, Follow::Final).await?;
        let dst = self.resolve(to, Follow::Final).await?;
        if !overwrite {
            match host::lstat(&dst).await {
                Ok(_) => {
                    return Err(VfsError::already_exists(format!(
                        "file already exists, copyfile '{}' -> '{}'",
                        src.display(),
                        dst.display()
                    )));
                }
                Err(e) if e.is("ENOENT") => {}
                Err(e) => return Err(e.into()),
            }
        }
        host::copy(&src, &dst).await?;
        Ok(())
    }

    async fn copy_dir(&self, from: &Path, to: &Path) -> VfsResult<()> {
        self.check_writable()?;
        let src = self.resolve(from, Follow::Final).await?;
        let dst = self.resolve(to, Follow::Final).await?;

        Self::require_dir(&src).await?;
        if let Some(parent) = dst.parent() {
            Self::require_dir(parent).await?;
        }
        if dst.starts_with(&src) {
            return Err(VfsError::invalid_argument(format!(
                "cannot copy {} into itself",
                src.display()
            )));
        }

        host::mkdir(&dst).await?;
        tracing::debug!(from = %src.display(), to = %dst.display(), "copying directory");
        Self::copy_tree(src, dst).await
    }

    async fn remove_file(&self, path: &Path) -> VfsResult<()> {
        self.check_writable()?;
        let real = self.resolve(path, Follow::NoFinal).await?;
        Ok(host::unlink(&real).await?)
    }

    async fn remove_dir(&self, path: &Path, recursive: bool) -> VfsResult<()> {
        self.check_writable()?;
        let real = self.resolve(path, Follow::Final).await?;
        Self::require_dir(&real).await?;
        if recursive {
            tracing::debug!(path = %real.display(), "removing directory tree");
            host::rmdir_all(&real).await?;
        } else {
            host::rmdir(&real).await?;
        }
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        self.check_writable()?;
        let src = self.resolve(from, Follow::Final).await?;
        let dst = self.resolve(to, Follow::Final).await?;
        Ok(host::rename(&src, &dst).await?)
    }

    async fn mkdir(&self, path: &Path) -> VfsResult<()> {
        self.check_writable()?;
        let real = self.resolve(path, Follow::Final).await?;
        Ok(host::mkdir(&real).await?)
    }

    async fn symlink(&self, path: &Path, target: &Path, style: SymlinkTarget) -> VfsResult<()> {
        self.check_writable()?;
        let link = self.resolve(path, Follow::NoFinal).await?;
        let target = match style {
            SymlinkTarget::Relative => target.to_path_buf(),
            SymlinkTarget::Absolute => {
                let mut real = self.root().to_path_buf();
                real.extend(
                    target
                        .components()
                        .filter(|c| matches!(c, Component::Normal(_) | Component::ParentDir)),
                );
                real
            }
        };
        host::symlink(&target, &link).await?;
        Ok(())
    }

    async fn open_file(&self, path: &Path, flags: OpenFlags) -> VfsResult<FileHandle> {
        if flags.mutates() {
            self.check_writable()?;
        }
        let real = self.resolve(path, Follow::Final).await?;
        let file = host::open(&real, &flags.to_tokio()).await?;
        Ok(FileHandle::new(file, real))
    }

    fn watch(
        &self,
        pattern: &str,
        on_event: EventCallback,
        on_error: ErrorCallback,
    ) -> VfsResult<WatchHandle> {
        self.watcher.register(pattern, on_event, on_error)
    }

    fn read_only(&self) -> bool {
        self.read_only
    }
}
