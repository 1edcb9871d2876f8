//! Storage usage accounting.

use tracing::{debug, warn};
use walkdir::WalkDir;

use super::error::{StorageError, StorageResult};
use super::resolver::{RelativePath, StorageRoot};

/// Aggregate usage beneath a directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageReport {
    /// Sum of regular file sizes.
    pub total_bytes: u64,
    /// Number of regular files.
    pub file_count: u64,
    /// Number of directories, not counting the starting one.
    pub directory_count: u64,
}

/// Walk `rel` recursively and total up what is stored there.
///
/// Symlinks are not followed. Entries that cannot be read are skipped, but
/// failing to open the starting directory is an error. Figures are
/// approximate while writes are in flight.
pub fn usage(root: &StorageRoot, rel: &RelativePath) -> StorageResult<UsageReport> {
    let start = root.resolver().resolve(rel)?;
    if !start.is_dir() {
        return Err(StorageError::NotADirectory(rel.to_string()));
    }

    let mut report = UsageReport::default();
    for entry in WalkDir::new(&start).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                let path = e.path().unwrap_or(start.as_path()).to_path_buf();
                let err = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
                return Err(StorageError::from_io(err, path, &rel.to_string()));
            }
            Err(e) => {
                warn!(path = ?e.path(), error = %e, "Skipping entry during usage scan");
                continue;
            }
        };

        if entry.depth() == 0 {
            continue;
        }

        let file_type = entry.file_type();
        if file_type.is_dir() {
            report.directory_count += 1;
        } else if file_type.is_file() {
            match entry.metadata() {
                Ok(metadata) => {
                    report.total_bytes += metadata.len();
                    report.file_count += 1;
                }
                Err(e) => warn!(path = ?entry.path(), error = %e, "Skipping unreadable file"),
            }
        }
    }

    debug!(
        path = %rel,
        total_bytes = report.total_bytes,
        file_count = report.file_count,
        "Computed usage"
    );
    Ok(report)
}
