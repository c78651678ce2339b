//! Jail-enforcing path resolution.
//!
//! Turns caller path segments into a real path under a [`BaseDirectory`],
//! following every symlink on the way by hand rather than trusting
//! `canonicalize`. A link may point anywhere, but no resolution returns a path
//! outside the base.
//!
//! ```text
//!   segments ──► work-list ──► readlink(p/seg) ─┬─ EINVAL  → p = p/seg
//!                   ▲                           ├─ ENOENT  → last? p = p/seg : fail
//!                   │                           └─ target  → hop += 1
//!                   └──── target components + pending ◄──┘
//! ```
//!
//! Absolute link targets restart from the filesystem root and suspend the
//! per-`..` escape check until the next relative link; the final containment
//! check always runs.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use super::error::{VfsError, VfsResult};
use super::host;

/// Maximum number of symlinks followed during one resolution.
pub const MAX_SYMLINK_HOPS: usize = 40;

/// Whether the last segment's own symlink is followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Follow {
    /// Resolve through a final symlink to its target.
    Final,
    /// Stop at a final symlink and return the link path itself.
    NoFinal,
}

/// Presentation of a virtual path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualStyle {
    /// `/sub/file.txt`
    Absolute,
    /// `./sub/file.txt`
    Relative,
}

/// The jail root: canonical, absolute, resolved once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseDirectory {
    path: PathBuf,
    volume: Option<OsString>,
}

impl BaseDirectory {
    /// Canonicalize `root` and capture its volume.
    pub fn new(root: impl AsRef<Path>) -> VfsResult<Self> {
        let root = root.as_ref();
        let path = dunce::canonicalize(root)
            .map_err(|e| host::HostError::at("realpath", root, e))?;
        let volume = volume_of(&path);
        Ok(Self { path, volume })
    }

    /// The canonical real path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if `path` is the base or lies under it, bounded by a
    /// separator (so `/srv/jail2` is not inside `/srv/jail`).
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.path)
    }

    /// Render a real path as a virtual path rooted at the base.
    pub fn to_virtual(&self, real: &Path, style: VirtualStyle) -> VfsResult<PathBuf> {
        if volume_of(real) != self.volume {
            return Err(VfsError::unsupported(format!(
                "{} is on a different volume than {}",
                real.display(),
                self.path.display()
            )));
        }

        let rel = real.strip_prefix(&self.path).map_err(|_| {
            VfsError::invalid_argument(format!(
                "{} is not under {}",
                real.display(),
                self.path.display()
            ))
        })?;

        let mut out = match style {
            VirtualStyle::Absolute => PathBuf::from("/"),
            VirtualStyle::Relative => PathBuf::from("."),
        };
        out.extend(rel.components());
        Ok(out)
    }
}

fn volume_of(path: &Path) -> Option<OsString> {
    match path.components().next() {
        Some(Component::Prefix(prefix)) => Some(prefix.as_os_str().to_os_string()),
        _ => None,
    }
}

/// Ordered path components relative to the base; may contain `.` and `..`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSegments(Vec<OsString>);

impl PathSegments {
    /// Split a virtual path. `/a/b`, `a/b` and `./a/b` are equivalent.
    pub fn parse(path: impl AsRef<Path>) -> Self {
        let segments = path
            .as_ref()
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => Some(name.to_os_string()),
                Component::ParentDir => Some(OsString::from("..")),
                Component::CurDir | Component::RootDir | Component::Prefix(_) => None,
            })
            .collect();
        Self(segments)
    }

    /// Build from raw segments, kept verbatim.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Jail-enforcing, symlink-aware resolver.
///
/// Cheap to clone; streams carry a clone into their deferred open.
#[derive(Debug, Clone)]
pub struct PathResolver {
    base: Arc<BaseDirectory>,
}

impl PathResolver {
    pub fn new(base: impl Into<Arc<BaseDirectory>>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &BaseDirectory {
        &self.base
    }

    /// Resolve a virtual path.
    pub async fn resolve(&self, path: &Path, follow: Follow) -> VfsResult<PathBuf> {
        self.resolve_segments(PathSegments::parse(path), follow).await
    }

    /// Resolve segments to a real path inside the base.
    ///
    /// A missing final segment is tolerated; a missing intermediate one fails
    /// `ENOENT`. Escapes and more than [`MAX_SYMLINK_HOPS`] links fail `EINVAL`.
    pub async fn resolve_segments(
        &self,
        segments: PathSegments,
        follow: Follow,
    ) -> VfsResult<PathBuf> {
        let base = self.base.path();
        let mut p = base.to_path_buf();
        let mut strict = true;
        let mut hops = 0usize;
        let mut work: VecDeque<OsString> = segments.0.into();

        while let Some(segment) = work.pop_front() {
            if segment == ".." {
                let parent = p.parent().map(Path::to_path_buf).unwrap_or_else(|| p.clone());
                if strict && !self.base.contains(&parent) {
                    tracing::debug!(
                        base = %base.display(),
                        at = %p.display(),
                        "resolution escaped the jail via .."
                    );
                    return Err(VfsError::invalid_argument(format!(
                        "path escapes root: {}",
                        parent.display()
                    )));
                }
                p = parent;
                continue;
            }
            if segment.is_empty() || segment == "." {
                continue;
            }

            let candidate = p.join(&segment);
            let is_last = work.is_empty();

            let target = match host::readlink(&candidate).await {
                Ok(target) => target,
                Err(e) if e.is("EINVAL") => {
                    p = candidate;
                    continue;
                }
                Err(e) if e.is("ENOENT") && is_last => {
                    p = candidate;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            hops += 1;
            if hops > MAX_SYMLINK_HOPS {
                tracing::debug!(
                    base = %base.display(),
                    link = %candidate.display(),
                    hops,
                    "symlink hop limit exceeded"
                );
                return Err(VfsError::invalid_argument(format!(
                    "too many symbolic links: {}",
                    candidate.display()
                )));
            }

            if is_last && follow == Follow::NoFinal {
                p = candidate;
                break;
            }

            let mut expanded: VecDeque<OsString> = VecDeque::new();
            let mut root = PathBuf::new();
            for component in target.components() {
                match component {
                    Component::Prefix(_) | Component::RootDir => root.push(component),
                    Component::CurDir => {}
                    Component::ParentDir => expanded.push_back(OsString::from("..")),
                    Component::Normal(name) => expanded.push_back(name.to_os_string()),
                }
            }
            expanded.extend(work.drain(..));
            work = expanded;

            if target.is_absolute() {
                p = root;
                strict = false;
            } else {
                strict = true;
            }
        }

        if self.base.contains(&p) {
            Ok(p)
        } else {
            tracing::debug!(
                base = %base.display(),
                resolved = %p.display(),
                "resolved path lies outside the jail"
            );
            Err(VfsError::invalid_argument(format!(
                "path escapes root: {}",
                p.display()
            )))
        }
    }
}
