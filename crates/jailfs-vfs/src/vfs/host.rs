//! Host filesystem calls.
//!
//! Thin wrappers over `tokio::fs` that turn `std::io::Error` into a
//! [`HostError`] carrying the POSIX code name, the syscall and the path, e.g.
//! `ENOENT: no such file or directory, stat '/srv/x'`. Nothing here knows
//! about the jail; callers pass already-resolved real paths.

use std::ffi::OsString;
use std::fs::{FileType as StdFileType, Metadata};
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// A failed host call.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HostError {
    code: Option<String>,
    message: String,
    #[source]
    source: io::Error,
}

/// Result of a host call.
pub type HostResult<T> = Result<T, HostError>;

impl HostError {
    /// Build a host error from its parts.
    pub fn new(code: Option<String>, message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code,
            message: message.into(),
            source,
        }
    }

    /// Wrap an I/O error raised by `syscall` on `path`.
    pub fn at(syscall: &str, path: &Path, source: io::Error) -> Self {
        let detail = format!("{}, {} '{}'", describe(&source), syscall, path.display());
        Self::with_detail(detail, source)
    }

    /// Wrap an I/O error raised by a two-path call such as `rename`.
    pub fn between(syscall: &str, from: &Path, to: &Path, source: io::Error) -> Self {
        let detail = format!(
            "{}, {} '{}' -> '{}'",
            describe(&source),
            syscall,
            from.display(),
            to.display()
        );
        Self::with_detail(detail, source)
    }

    /// Wrap an I/O error with no path context.
    pub fn from_io(source: io::Error) -> Self {
        let detail = describe(&source);
        Self::with_detail(detail, source)
    }

    fn with_detail(detail: String, source: io::Error) -> Self {
        let code = errno_name(&source).map(str::to_string);
        let message = match &code {
            Some(code) => format!("{code}: {detail}"),
            None => detail,
        };
        Self {
            code,
            message,
            source,
        }
    }

    /// The POSIX code name, if the host reported one.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Full host message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if the host reported `code`.
    pub fn is(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }
}

/// Lowercased OS description without the `(os error N)` suffix.
fn describe(err: &io::Error) -> String {
    let text = err.to_string();
    let text = match text.rfind(" (os error ") {
        Some(idx) => &text[..idx],
        None => text.as_str(),
    };
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn errno_name(err: &io::Error) -> Option<&'static str> {
    use rustix::io::Errno;

    const NAMES: &[(Errno, &str)] = &[
        (Errno::NOENT, "ENOENT"),
        (Errno::NOTDIR, "ENOTDIR"),
        (Errno::ISDIR, "EISDIR"),
        (Errno::NOTEMPTY, "ENOTEMPTY"),
        (Errno::ACCESS, "EACCES"),
        (Errno::PERM, "EPERM"),
        (Errno::MFILE, "EMFILE"),
        (Errno::NFILE, "ENFILE"),
        (Errno::BADF, "EBADF"),
        (Errno::INVAL, "EINVAL"),
        (Errno::EXIST, "EEXIST"),
        (Errno::OPNOTSUPP, "ENOTSUP"),
        (Errno::NOSYS, "ENOSYS"),
        (Errno::LOOP, "ELOOP"),
        (Errno::XDEV, "EXDEV"),
        (Errno::NAMETOOLONG, "ENAMETOOLONG"),
        (Errno::ROFS, "EROFS"),
        (Errno::NOSPC, "ENOSPC"),
        (Errno::BUSY, "EBUSY"),
        (Errno::IO, "EIO"),
    ];

    let errno = Errno::from_io_error(err)?;
    NAMES
        .iter()
        .find(|(candidate, _)| *candidate == errno)
        .map(|(_, name)| *name)
}

// ============================================================================
// Calls
// ============================================================================

pub async fn readlink(path: &Path) -> HostResult<PathBuf> {
    fs::read_link(path)
        .await
        .map_err(|e| HostError::at("readlink", path, e))
}

pub async fn stat(path: &Path) -> HostResult<Metadata> {
    fs::metadata(path)
        .await
        .map_err(|e| HostError::at("stat", path, e))
}

pub async fn lstat(path: &Path) -> HostResult<Metadata> {
    fs::symlink_metadata(path)
        .await
        .map_err(|e| HostError::at("lstat", path, e))
}

/// List a directory as `(name, type)` pairs, without following links.
pub async fn readdir(path: &Path) -> HostResult<Vec<(OsString, StdFileType)>> {
    let mut dir = fs::read_dir(path)
        .await
        .map_err(|e| HostError::at("scandir", path, e))?;

    let mut entries = Vec::new();
    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|e| HostError::at("scandir", path, e))?
    {
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| HostError::at("lstat", &entry.path(), e))?;
        entries.push((entry.file_name(), file_type));
    }
    Ok(entries)
}

pub async fn read(path: &Path) -> HostResult<Vec<u8>> {
    fs::read(path).await.map_err(|e| HostError::at("open", path, e))
}

pub async fn write(path: &Path, data: &[u8]) -> HostResult<()> {
    fs::write(path, data)
        .await
        .map_err(|e| HostError::at("open", path, e))
}

pub async fn append(path: &Path, data: &[u8]) -> HostResult<()> {
    let mut file = fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .await
        .map_err(|e| HostError::at("open", path, e))?;
    file.write_all(data)
        .await
        .map_err(|e| HostError::at("write", path, e))?;
    file.flush()
        .await
        .map_err(|e| HostError::at("write", path, e))
}

pub async fn open(path: &Path, options: &fs::OpenOptions) -> HostResult<fs::File> {
    options
        .open(path)
        .await
        .map_err(|e| HostError::at("open", path, e))
}

pub async fn copy(from: &Path, to: &Path) -> HostResult<u64> {
    fs::copy(from, to)
        .await
        .map_err(|e| HostError::between("copyfile", from, to, e))
}

pub async fn rename(from: &Path, to: &Path) -> HostResult<()> {
    fs::rename(from, to)
        .await
        .map_err(|e| HostError::between("rename", from, to, e))
}

pub async fn mkdir(path: &Path) -> HostResult<()> {
    fs::create_dir(path)
        .await
        .map_err(|e| HostError::at("mkdir", path, e))
}

pub async fn unlink(path: &Path) -> HostResult<()> {
    fs::remove_file(path)
        .await
        .map_err(|e| HostError::at("unlink", path, e))
}

pub async fn rmdir(path: &Path) -> HostResult<()> {
    fs::remove_dir(path)
        .await
        .map_err(|e| HostError::at("rmdir", path, e))
}

pub async fn rmdir_all(path: &Path) -> HostResult<()> {
    fs::remove_dir_all(path)
        .await
        .map_err(|e| HostError::at("rm", path, e))
}

pub async fn symlink(target: &Path, link: &Path) -> HostResult<()> {
    fs::symlink(target, link)
        .await
        .map_err(|e| HostError::between("symlink", target, link, e))
}
