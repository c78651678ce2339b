//! Virtual Filesystem abstraction.
//!
//! This module provides a path-based VFS over a real directory tree that no
//! operation can leave. Key components:
//!
//! - [`VfsOps`] - Core trait for filesystem operations
//! - [`PathResolver`] - Symlink-aware resolution jailed under a [`BaseDirectory`]
//! - [`VfsError`] - Canonical error codes, normalized from host errors
//! - [`ReadStream`] / [`WriteStream`] - Lazy, cancellable streaming
//! - [`WatchMultiplexer`] - One native watch fanned out to glob listeners
//! - [`LocalBackend`] - Local filesystem access composing all of the above
//!
//! ## Design Decisions
//!
//! - **Manual symlink walk**: resolution reads each link itself instead of
//!   calling `canonicalize`, so a link pointing outside the root fails with
//!   `EINVAL` rather than silently leaking.
//! - **Deferred stream failures**: streams are returned synchronously and
//!   report open errors when consumed.
//! - **Single native watch**: the first listener subscribes, the last one
//!   to drop tears the subscription down.

pub mod backends;
mod error;
mod handle;
pub mod host;
mod ops;
mod resolve;
mod stream;
mod types;
mod watch;

pub use backends::LocalBackend;
pub use error::{ErrorCode, VfsError, VfsResult};
pub use handle::FileHandle;
pub use host::{HostError, HostResult};
pub use ops::VfsOps;
pub use resolve::{BaseDirectory, Follow, MAX_SYMLINK_HOPS, PathResolver, PathSegments, VirtualStyle};
pub use stream::{OpenedFile, PendingOpen, ReadStream, WriteStream};
pub use types::{
    DEFAULT_CHUNK_SIZE, DirEntry, FileAttr, FileType, OpenFlags, ReadStreamOptions, SymlinkTarget,
    WriteStreamOptions,
};
pub use watch::{
    ChangeEvent, ChangeKind, ChangeNotifier, ErrorCallback, EventCallback, NativeSubscription,
    NotifyBatch, NotifySink, NotifyWatcher, RawChange, WatchHandle, WatchMultiplexer,
};
