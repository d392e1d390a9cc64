//! Request path resolution against the served root.
//!
//! Every caller-supplied path is resolved to an absolute canonical path and
//! proven to live inside the configured root before any other component
//! touches storage. The check runs on every request and is never cached:
//! both the root and the filesystem (symlinks in particular) can change
//! between requests.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::PathError;

/// An absolute, canonicalized path proven to lie within the served root.
///
/// Operations that touch storage take a `ResolvedPath`, never a raw caller
/// string. The only way to construct one is [`resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedPath(PathBuf);

impl ResolvedPath {
    /// The canonical absolute path.
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Consume the wrapper, yielding the inner path.
    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }

    /// Final path component, for display.
    pub fn file_name(&self) -> Option<&str> {
        self.0.file_name().and_then(|n| n.to_str())
    }
}

impl AsRef<Path> for ResolvedPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// Resolve `relative` against `root` and verify containment.
///
/// Canonicalizes `root/relative` (normalizing `.`, `..` and symlinks) and
/// fails with [`PathError::Traversal`] when the canonical result is not the
/// root itself or one of its descendants. Fails with [`PathError::NotFound`]
/// when the target does not exist, since canonicalization requires an
/// existing file.
pub fn resolve(root: &Path, relative: &str) -> Result<ResolvedPath, PathError> {
    // The root is canonicalized on every call as well; it may itself be a
    // symlink that was repointed since the last request.
    let root = root.canonicalize().map_err(|_| PathError::NotFound {
        path: root.to_path_buf(),
    })?;

    let joined = root.join(relative.trim_start_matches(['/', '\\']));
    let canonical = match joined.canonicalize() {
        Ok(p) => p,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            // Distinguish escapes from genuinely missing files: a missing
            // path that would also escape the root is reported as traversal.
            if !lexical_escape_check(&root, relative) {
                debug!(relative, "rejected traversal attempt on missing path");
                return Err(PathError::Traversal {
                    relative: relative.to_string(),
                });
            }
            return Err(PathError::NotFound { path: joined });
        }
        Err(_) => return Err(PathError::NotFound { path: joined }),
    };

    if !canonical.starts_with(&root) {
        debug!(relative, "rejected traversal attempt");
        return Err(PathError::Traversal {
            relative: relative.to_string(),
        });
    }

    Ok(ResolvedPath(canonical))
}

/// Lexical containment check for paths that do not exist yet.
///
/// Walks the relative components counting depth; returns false when `..`
/// would climb above the root at any point. Symlink escapes cannot occur
/// here because the path does not exist.
fn lexical_escape_check(_root: &Path, relative: &str) -> bool {
    let mut depth: i64 = 0;
    for component in Path::new(relative).components() {
        use std::path::Component;
        match component {
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {}
        }
    }
    true
}
