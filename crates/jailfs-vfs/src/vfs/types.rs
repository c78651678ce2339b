//! Core VFS types.
//!
//! Path-based records shared by every backend: attributes, directory entries,
//! open flags and stream options.

use std::fs::Metadata;
use std::time::SystemTime;

/// Default chunk size for read streams (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
}

impl FileType {
    /// Classify a host file type. Sockets, FIFOs and devices have no
    /// counterpart and yield `None`.
    pub fn from_std(ft: std::fs::FileType) -> Option<Self> {
        if ft.is_symlink() {
            Some(FileType::Symlink)
        } else if ft.is_dir() {
            Some(FileType::Directory)
        } else if ft.is_file() {
            Some(FileType::File)
        } else {
            None
        }
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }
}

/// File attributes (metadata).
#[derive(Debug, Clone)]
pub struct FileAttr {
    /// Size in bytes.
    pub size: u64,
    /// File type of the resolved target. Never `Symlink` for a followed path.
    pub kind: FileType,
    /// Whether the requested path itself is a symbolic link.
    pub is_symlink: bool,
    /// Unix permissions (e.g., 0o644).
    pub perm: u32,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Last access time (optional).
    pub atime: Option<SystemTime>,
    /// Creation time (optional).
    pub ctime: Option<SystemTime>,
    /// Number of hard links.
    pub nlink: u32,
    /// User ID.
    pub uid: Option<u32>,
    /// Group ID.
    pub gid: Option<u32>,
}

impl FileAttr {
    /// Convert host metadata.
    pub fn from_metadata(meta: &Metadata) -> Self {
        use std::os::unix::fs::{MetadataExt, PermissionsExt};

        // Metadata of an unknown type (FIFO, socket) is reported as a file.
        let kind = FileType::from_std(meta.file_type()).unwrap_or(FileType::File);

        FileAttr {
            size: meta.len(),
            kind,
            is_symlink: kind.is_symlink(),
            perm: meta.permissions().mode() & 0o7777,
            mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            atime: meta.accessed().ok(),
            ctime: meta.created().ok(),
            nlink: meta.nlink() as u32,
            uid: Some(meta.uid()),
            gid: Some(meta.gid()),
        }
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// Directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry type, not following links.
    pub kind: FileType,
}

impl DirEntry {
    /// Create a new directory entry.
    pub fn new(name: impl Into<String>, kind: FileType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Open file flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    /// Read access requested.
    pub read: bool,
    /// Write access requested.
    pub write: bool,
    /// Append mode.
    pub append: bool,
    /// Create if not exists.
    pub create: bool,
    /// Truncate on open.
    pub truncate: bool,
    /// Exclusive create (fail if exists).
    pub exclusive: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            append: false,
            create: false,
            truncate: false,
            exclusive: false,
        }
    }
}

impl OpenFlags {
    /// Read-only access.
    pub fn read() -> Self {
        Self::default()
    }

    /// Create with write access.
    pub fn create() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            ..Default::default()
        }
    }

    /// Create exclusively (fail if exists).
    pub fn create_exclusive() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            exclusive: true,
            ..Default::default()
        }
    }

    /// Returns true if opening with these flags may modify the filesystem.
    pub fn mutates(&self) -> bool {
        self.write || self.append || self.create || self.truncate || self.exclusive
    }

    pub(crate) fn to_tokio(self) -> tokio::fs::OpenOptions {
        let mut options = tokio::fs::OpenOptions::new();
        options
            .read(self.read)
            .write(self.write || self.append)
            .append(self.append)
            .truncate(self.truncate);
        if self.exclusive {
            options.create_new(true);
        } else {
            options.create(self.create);
        }
        options
    }
}

/// Options for [`read_stream`](super::VfsOps::read_stream).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadStreamOptions {
    /// Byte offset to start reading from.
    pub position: u64,
    /// Maximum number of bytes to read; `None` reads to EOF.
    pub length: Option<u64>,
    /// Size of each yielded chunk.
    pub chunk_size: usize,
}

impl Default for ReadStreamOptions {
    fn default() -> Self {
        Self {
            position: 0,
            length: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ReadStreamOptions {
    /// Read `length` bytes starting at `position`.
    pub fn range(position: u64, length: u64) -> Self {
        Self {
            position,
            length: Some(length),
            ..Default::default()
        }
    }
}

/// Options for [`write_stream`](super::VfsOps::write_stream).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStreamOptions {
    /// Append instead of truncating.
    pub append: bool,
}

/// How [`symlink`](super::VfsOps::symlink) stores its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymlinkTarget {
    /// Store the target verbatim (relative to the link's directory).
    Relative,
    /// Treat the target as a virtual path and store it as an absolute real
    /// path under the base directory.
    Absolute,
}
