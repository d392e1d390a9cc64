//! Directory tree listing for the slide browser.
//!
//! Builds a serializable tree of the served root, keeping only directories
//! that (transitively) contain servable images. Sidecar and private
//! directories are never listed, and unreadable subtrees are skipped rather
//! than failing the whole listing.

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::convert::SIDECAR_DIR;
use crate::pyramid::is_tiff_magic;

/// Directories excluded from every listing, regardless of content.
const HIDDEN_DIRS: &[&str] = &[SIDECAR_DIR, "private"];

/// Default maximum listing depth.
pub const DEFAULT_FOLDER_DEPTH: usize = 4;

/// One node of the browser tree.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryNode {
    /// Display name (final path segment).
    pub name: String,
    /// Path relative to the served root, using forward slashes.
    pub path: String,
    /// Child nodes; empty for leaves.
    pub children: Vec<DirectoryNode>,
    /// Whether this node is a servable image rather than a directory.
    pub leaf: bool,
}

/// List the tree under `root`/`relative` down to `max_depth` levels.
///
/// `filter`, when non-empty, keeps only leaves whose name contains it
/// (case-insensitive); directories survive as long as they still contain a
/// matching leaf. Returned children are sorted by name at every level.
pub fn list_tree(
    root: &Path,
    relative: &str,
    max_depth: usize,
    filter: &str,
) -> Vec<DirectoryNode> {
    let relative = relative.trim_matches('/');
    let dir = if relative.is_empty() {
        root.to_path_buf()
    } else {
        root.join(relative)
    };
    let filter = filter.to_lowercase();
    list_dir(&dir, relative, max_depth, &filter)
}

fn list_dir(dir: &Path, relative: &str, depth: usize, filter: &str) -> Vec<DirectoryNode> {
    if depth == 0 {
        return Vec::new();
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = %dir.display(), error = %e, "skipping unreadable directory");
            return Vec::new();
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();

    let mut nodes = Vec::new();
    for name in names {
        let path = dir.join(&name);
        let child_relative = if relative.is_empty() {
            name.clone()
        } else {
            format!("{relative}/{name}")
        };

        if path.is_dir() {
            if HIDDEN_DIRS.contains(&name.as_str()) || name.starts_with('.') {
                continue;
            }
            let children = list_dir(&path, &child_relative, depth - 1, filter);
            // Empty directories (or ones whose content was filtered away)
            // are dropped from the tree.
            if !children.is_empty() {
                nodes.push(DirectoryNode {
                    name,
                    path: child_relative,
                    children,
                    leaf: false,
                });
            }
        } else if is_servable_image(&path) {
            if !filter.is_empty() && !name.to_lowercase().contains(filter) {
                continue;
            }
            nodes.push(DirectoryNode {
                name,
                path: child_relative,
                children: Vec::new(),
                leaf: true,
            });
        }
    }
    nodes
}

/// Whether a file can be served, by content magic rather than extension.
///
/// Project files (`.tmap`) are listed too so the browser can open them.
fn is_servable_image(path: &Path) -> bool {
    if path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("tmap"))
    {
        return true;
    }

    let mut header = [0u8; 8];
    let read = match fs::File::open(path).and_then(|mut f| f.read(&mut header)) {
        Ok(n) => n,
        Err(_) => return false,
    };
    let header = &header[..read];

    is_tiff_magic(header)
        || header.starts_with(b"\x89PNG")
        || header.starts_with(&[0xFF, 0xD8])
        || header.starts_with(b"BM")
        || header.starts_with(b"GIF8")
}
