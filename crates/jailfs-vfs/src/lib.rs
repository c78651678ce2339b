//! # jailfs-vfs
//!
//! Sandboxed filesystem backend for jailfs.
//!
//! A [`LocalBackend`] exposes a real directory tree through the [`VfsOps`]
//! trait while guaranteeing that no operation observes or mutates anything
//! outside its root, even when the tree holds symlinks pointing elsewhere.
//! Host errors come back as canonical [`VfsError`] codes, reads and writes can
//! be streamed and cancelled, and one native watch is shared by any number of
//! glob-filtered listeners.
//!
//! Unix hosts only: symlinks and errno names come straight from the OS.

pub mod config;
pub mod vfs;

pub use config::{BackendConfig, ConfigError, WatchConfig};
pub use vfs::{
    DirEntry, ErrorCode, FileAttr, FileHandle, FileType, LocalBackend, OpenFlags,
    ReadStreamOptions, SymlinkTarget, VfsError, VfsOps, VfsResult, WriteStreamOptions,
};
