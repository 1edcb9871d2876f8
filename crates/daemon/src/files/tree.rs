//! Directory listing, creation and deletion inside a storage root.

use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::{StorageError, StorageResult};
use super::resolver::{validate_segment, RelativePath, StorageRoot};

/// Kind of a listed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A directory.
    Directory,
    /// A regular file.
    File,
}

/// A single listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Entry name, never empty.
    pub name: String,
    /// File or directory.
    pub kind: NodeKind,
    /// Size in bytes, `None` for directories.
    pub size: Option<u64>,
    /// Last modification time.
    pub modified: SystemTime,
    /// Path of the entry relative to the root.
    pub path: RelativePath,
}

/// What `list` does when the requested directory is missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingDirectory {
    /// Fail with `NotFound`.
    #[default]
    Fail,
    /// Create the directory chain and return an empty listing.
    Create,
}

/// What `delete` removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletedKind {
    /// A regular file.
    File,
    /// A directory and everything beneath it.
    Directory,
    /// A symbolic link; its target was left alone.
    Symlink,
}

/// List the direct children of a directory.
///
/// Directories come first, then files, each group ordered by lowercase name
/// with the exact name as tiebreak. Entries whose names are not UTF-8,
/// special files and symlinks pointing outside the root are left out.
///
/// Names that cannot be addressed through a [`RelativePath`] are also left
/// out. On Unix that includes names containing `\`, which paths treat as a
/// separator; such files can only be reached outside the engine, although
/// [`usage`](super::accounting::usage) still counts them.
pub fn list(
    root: &StorageRoot,
    rel: &RelativePath,
    policy: MissingDirectory,
) -> StorageResult<Vec<Node>> {
    let resolver = root.resolver();
    let dir = match resolver.resolve(rel) {
        Ok(dir) => dir,
        Err(StorageError::NotFound(_)) if policy == MissingDirectory::Create => {
            ensure_directory_chain(root, rel)?;
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };
    if !dir.is_dir() {
        return Err(StorageError::NotADirectory(rel.to_string()));
    }

    let entries = fs::read_dir(&dir).map_err(|e| StorageError::from_io(e, &dir, &rel.to_string()))?;

    let mut nodes = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path = %rel, error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };

        let Ok(name) = entry.file_name().into_string() else {
            debug!(path = %rel, "Skipping entry with non-UTF-8 name");
            continue;
        };
        if let Err(e) = validate_segment(&name) {
            warn!(path = %rel, name = %name, error = %e, "Skipping entry with unaddressable name");
            continue;
        }

        let metadata = match entry_metadata(&entry.path(), root) {
            Ok(Some(metadata)) => metadata,
            Ok(None) => {
                debug!(path = %rel, name = %name, "Skipping entry outside root");
                continue;
            }
            Err(e) => {
                warn!(path = %rel, name = %name, error = %e, "Skipping entry without metadata");
                continue;
            }
        };

        let (kind, size) = if metadata.is_dir() {
            (NodeKind::Directory, None)
        } else if metadata.is_file() {
            (NodeKind::File, Some(metadata.len()))
        } else {
            continue;
        };

        nodes.push(Node {
            path: rel.join(&name),
            name,
            kind,
            size,
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }

    nodes.sort_by(compare_nodes);
    debug!(path = %rel, count = nodes.len(), "Listed directory");
    Ok(nodes)
}

/// Metadata for a listing entry, following symlinks that stay inside the root.
fn entry_metadata(path: &Path, root: &StorageRoot) -> io::Result<Option<fs::Metadata>> {
    let metadata = fs::symlink_metadata(path)?;
    if !metadata.file_type().is_symlink() {
        return Ok(Some(metadata));
    }
    let target = match fs::canonicalize(path) {
        Ok(target) => target,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    if !root.resolver().contains(&target) {
        return Ok(None);
    }
    fs::metadata(target).map(Some)
}

fn compare_nodes(a: &Node, b: &Node) -> Ordering {
    let rank = |kind: NodeKind| match kind {
        NodeKind::Directory => 0,
        NodeKind::File => 1,
    };
    rank(a.kind)
        .cmp(&rank(b.kind))
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
}

/// Create `name` inside `parent`, along with any missing parents.
pub fn make_directory(
    root: &StorageRoot,
    parent: &RelativePath,
    name: &str,
) -> StorageResult<RelativePath> {
    let name = validate_segment(name)?;
    let target = parent.join(name);

    let path = root.resolver().resolve_for_creation(&target)?;
    if fs::symlink_metadata(&path).is_ok() {
        return Err(StorageError::AlreadyExists(target.to_string()));
    }

    if let Some(parent) = target.parent() {
        ensure_directory_chain(root, &parent)?;
    }
    // Re-resolve now that the parent chain exists.
    let path = root.resolver().resolve_for_creation(&target)?;
    fs::create_dir(&path).map_err(|e| StorageError::from_io(e, &path, &target.to_string()))?;

    info!(path = %target, "Created directory");
    Ok(target)
}

/// Create every missing directory along `rel`, one segment at a time.
///
/// Each segment is resolved before it is created, so a symlink planted
/// mid-chain cannot redirect creation outside the root. Returns the
/// canonical path of the final directory.
pub fn ensure_directory_chain(root: &StorageRoot, rel: &RelativePath) -> StorageResult<PathBuf> {
    let resolver = root.resolver();
    let mut current = RelativePath::root();

    for segment in rel.segments() {
        current = current.join(segment);
        let path = resolver.resolve_for_creation(&current)?;
        match fs::create_dir(&path) {
            Ok(()) => debug!(path = %current, "Created directory"),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if !path.is_dir() {
                    return Err(StorageError::NotADirectory(current.to_string()));
                }
            }
            Err(e) => return Err(StorageError::from_io(e, &path, &current.to_string())),
        }
    }

    let resolved = resolver.resolve(rel)?;
    if !resolved.is_dir() {
        return Err(StorageError::NotADirectory(rel.to_string()));
    }
    Ok(resolved)
}

/// Remove a file, a directory tree or a symlink.
///
/// The root itself cannot be deleted. A symlink is removed without touching
/// what it points at.
pub fn delete(root: &StorageRoot, rel: &RelativePath) -> StorageResult<DeletedKind> {
    let (Some(parent), Some(name)) = (rel.parent(), rel.file_name()) else {
        return Err(StorageError::PermissionDenied(
            "cannot delete storage root".to_string(),
        ));
    };

    let parent_path = root.resolver().resolve(&parent).map_err(|e| match e {
        StorageError::NotADirectory(_) => StorageError::NotFound(rel.to_string()),
        other => other,
    })?;
    if !parent_path.is_dir() {
        return Err(StorageError::NotFound(rel.to_string()));
    }

    let target = parent_path.join(name);
    let display = rel.to_string();
    let metadata =
        fs::symlink_metadata(&target).map_err(|e| StorageError::from_io(e, &target, &display))?;

    let kind = if metadata.file_type().is_symlink() {
        fs::remove_file(&target).map_err(|e| StorageError::from_io(e, &target, &display))?;
        DeletedKind::Symlink
    } else if metadata.is_dir() {
        fs::remove_dir_all(&target).map_err(|e| StorageError::from_io(e, &target, &display))?;
        DeletedKind::Directory
    } else {
        fs::remove_file(&target).map_err(|e| StorageError::from_io(e, &target, &display))?;
        DeletedKind::File
    };

    info!(path = %rel, kind = ?kind, "Deleted");
    Ok(kind)
}
