//! Batch ingestion of uploaded byte streams.
//!
//! Each item carries a client-declared name that may embed subdirectories
//! (`photos/2024/beach.jpg`). Names are sanitized segment by segment, the
//! directory chain is created under the base path, and the file is claimed
//! under a collision-free name before any bytes are written:
//!
//! ```text
//! report.pdf -> report_1.pdf -> report_2.pdf -> ...
//! ```
//!
//! Claims use create-if-absent opens, so two batches racing for the same
//! name never overwrite each other. Items succeed or fail independently.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::error::{StorageError, StorageResult};
use super::resolver::{RelativePath, StorageRoot};
use super::sanitize::{
    sanitize_file_name, sanitize_folder_name, split_extension, truncate_bytes, MAX_NAME_BYTES,
};
use super::tree::ensure_directory_chain;

/// Default per-item size limit (500 MB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 500 * 1024 * 1024;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// A named byte stream to ingest.
#[derive(Debug)]
pub struct UploadItem<R> {
    /// Client-declared name, possibly with `/` or `\` separated directories.
    pub name: String,
    /// Source of the file content.
    pub reader: R,
}

impl<R: Read> UploadItem<R> {
    /// Pair a declared name with its content.
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            reader,
        }
    }
}

/// Limits applied while ingesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    /// Largest accepted item, in bytes.
    pub max_file_size: u64,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// A file that was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedItem {
    /// Name as declared by the client.
    pub original_name: String,
    /// Where the file ended up, relative to the root.
    pub stored_path: RelativePath,
    /// Bytes written.
    pub size: u64,
    /// Lowercase hex SHA-256 of the content.
    pub sha256: String,
}

/// An item that could not be stored.
#[derive(Debug)]
pub struct FailedItem {
    /// Name as declared by the client.
    pub original_name: String,
    /// Why it failed.
    pub error: StorageError,
}

/// Outcome of a batch.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Successfully stored items, in input order.
    pub committed: Vec<CommittedItem>,
    /// Failed items, in input order.
    pub failed: Vec<FailedItem>,
}

impl IngestReport {
    /// Whether at least one item failed.
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Store a batch of items beneath `base`.
///
/// Fails as a whole only if there is nothing to ingest or the base path
/// itself cannot be resolved or created. Per-item failures are reported in
/// the returned [`IngestReport`].
pub fn ingest<R, I>(
    root: &StorageRoot,
    base: &RelativePath,
    items: I,
    options: &UploadOptions,
) -> StorageResult<IngestReport>
where
    R: Read,
    I: IntoIterator<Item = UploadItem<R>>,
{
    let items: Vec<UploadItem<R>> = items.into_iter().collect();
    if items.iter().all(|item| item.name.trim().is_empty()) {
        return Err(StorageError::NoValidFiles);
    }

    ensure_directory_chain(root, base)?;

    let mut report = IngestReport::default();
    for item in items {
        let original_name = item.name.clone();
        if original_name.trim().is_empty() {
            report.failed.push(FailedItem {
                original_name,
                error: StorageError::InvalidName(String::new()),
            });
            continue;
        }

        match ingest_one(root, base, item, options) {
            Ok(committed) => {
                debug!(
                    name = %committed.original_name,
                    stored = %committed.stored_path,
                    size = committed.size,
                    "Stored upload item"
                );
                report.committed.push(committed);
            }
            Err(error) => {
                warn!(name = %original_name, error = %error, "Upload item failed");
                report.failed.push(FailedItem {
                    original_name,
                    error,
                });
            }
        }
    }

    info!(
        base = %base,
        committed = report.committed.len(),
        failed = report.failed.len(),
        "Ingested upload batch"
    );
    Ok(report)
}

fn ingest_one<R: Read>(
    root: &StorageRoot,
    base: &RelativePath,
    item: UploadItem<R>,
    options: &UploadOptions,
) -> StorageResult<CommittedItem> {
    let (folders, file_name) = split_declared_name(&item.name)?;

    let mut dir = base.clone();
    for folder in &folders {
        dir = dir.join(folder);
    }
    ensure_directory_chain(root, &dir)?;

    let (stored_path, absolute, file) = claim_unique(root, &dir, &file_name)?;

    match write_contents(file, item.reader, options.max_file_size) {
        Ok((size, sha256)) => Ok(CommittedItem {
            original_name: item.name,
            stored_path,
            size,
            sha256,
        }),
        Err(error) => {
            let error = match error {
                WriteError::TooLarge => StorageError::FileTooLarge {
                    limit: options.max_file_size,
                },
                WriteError::Io(e) => StorageError::from_io(e, &absolute, &stored_path.to_string()),
            };
            remove_partial(&absolute);
            Err(error)
        }
    }
}

/// Split a declared name into sanitized folders and a sanitized file name.
fn split_declared_name(name: &str) -> StorageResult<(Vec<String>, String)> {
    let mut segments = Vec::new();
    for segment in name.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return Err(StorageError::PathEscape(name.to_string())),
            other => segments.push(other),
        }
    }

    let file_name = sanitize_file_name(segments.pop().unwrap_or_default());
    let folders = segments.into_iter().map(sanitize_folder_name).collect();
    Ok((folders, file_name))
}

/// Claim the first free name in the `name`, `name_1`, `name_2`, ... sequence.
fn claim_unique(
    root: &StorageRoot,
    dir: &RelativePath,
    file_name: &str,
) -> StorageResult<(RelativePath, PathBuf, File)> {
    let resolver = root.resolver();
    let (stem, ext) = split_extension(file_name);

    let mut counter: u64 = 0;
    loop {
        let candidate = if counter == 0 {
            file_name.to_string()
        } else {
            candidate_name(stem, ext, counter)
        };
        let rel = dir.join(&candidate);
        let path = resolver.resolve_for_creation(&rel)?;

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((rel, path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => counter += 1,
            Err(e) => return Err(StorageError::from_io(e, &path, &rel.to_string())),
        }
    }
}

/// `{stem}_{counter}{ext}`, with the stem shortened so the result stays
/// within [`MAX_NAME_BYTES`].
fn candidate_name(stem: &str, ext: &str, counter: u64) -> String {
    let suffix = format!("_{counter}");
    let budget = MAX_NAME_BYTES - suffix.len();

    if stem.len() + ext.len() <= budget {
        format!("{stem}{suffix}{ext}")
    } else if ext.len() < budget {
        format!("{}{suffix}{ext}", truncate_bytes(stem, budget - ext.len()))
    } else {
        // The extension alone leaves no room; give it up rather than the counter.
        let whole = format!("{stem}{ext}");
        format!("{}{suffix}", truncate_bytes(&whole, budget))
    }
}

enum WriteError {
    TooLarge,
    Io(io::Error),
}

impl From<io::Error> for WriteError {
    fn from(e: io::Error) -> Self {
        WriteError::Io(e)
    }
}

fn write_contents<R: Read>(
    mut file: File,
    reader: R,
    limit: u64,
) -> Result<(u64, String), WriteError> {
    let mut hasher = Sha256::new();
    let mut reader = reader.take(limit.saturating_add(1));
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut total: u64 = 0;

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        total += bytes_read as u64;
        if total > limit {
            return Err(WriteError::TooLarge);
        }
        file.write_all(&buffer[..bytes_read])?;
        hasher.update(&buffer[..bytes_read]);
    }

    file.flush()?;
    file.sync_all()?;
    Ok((total, hex::encode(hasher.finalize())))
}

fn remove_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!(path = ?path, error = %e, "Failed to remove partially written upload");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    use crate::files::tree::{list, MissingDirectory};

    fn setup() -> (TempDir, StorageRoot) {
        let temp = TempDir::new().unwrap();
        let root_dir = temp.path().join("root");
        fs::create_dir(&root_dir).unwrap();
        let root = StorageRoot::open(&root_dir).unwrap();
        (temp, root)
    }

    fn item(name: &str, data: &[u8]) -> UploadItem<Cursor<Vec<u8>>> {
        UploadItem::new(name, Cursor::new(data.to_vec()))
    }

    fn stored(report: &IngestReport) -> Vec<String> {
        report
            .committed
            .iter()
            .map(|c| c.stored_path.to_string())
            .collect()
    }

    /// Reader that yields some bytes then fails.
    struct FailingReader {
        sent: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.sent {
                Err(io::Error::other("connection dropped"))
            } else {
                self.sent = true;
                buf[..4].copy_from_slice(b"part");
                Ok(4)
            }
        }
    }

    #[test]
    fn test_duplicate_names_get_suffixes() {
        let (_temp, root) = setup();
        let report = ingest(
            &root,
            &RelativePath::root(),
            vec![item("report.pdf", b"one"), item("report.pdf", b"two")],
            &UploadOptions::default(),
        )
        .unwrap();

        assert_eq!(stored(&report), ["report.pdf", "report_1.pdf"]);
        assert!(!report.is_partial());

        let listed: Vec<String> = list(&root, &RelativePath::root(), MissingDirectory::Fail)
            .unwrap()
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(listed, ["report.pdf", "report_1.pdf"]);
        assert_eq!(fs::read(root.path().join("report_1.pdf")).unwrap(), b"two");
    }

    #[test]
    fn test_suffix_scan_skips_existing() {
        let (_temp, root) = setup();
        fs::write(root.path().join("a.txt"), b"").unwrap();
        fs::write(root.path().join("a_1.txt"), b"").unwrap();
        fs::write(root.path().join("README"), b"").unwrap();

        let report = ingest(
            &root,
            &RelativePath::root(),
            vec![item("a.txt", b"x"), item("README", b"y")],
            &UploadOptions::default(),
        )
        .unwrap();
        assert_eq!(stored(&report), ["a_2.txt", "README_1"]);
    }

    #[test]
    fn test_collision_at_name_length_limit() {
        let (_temp, root) = setup();
        let long_name = format!("{}.txt", "a".repeat(251));
        assert_eq!(long_name.len(), MAX_NAME_BYTES);

        let report = ingest(
            &root,
            &RelativePath::root(),
            vec![
                item(&long_name, b"one"),
                item(&long_name, b"two"),
                item(&long_name, b"three"),
            ],
            &UploadOptions::default(),
        )
        .unwrap();

        assert!(report.failed.is_empty(), "failed: {:?}", report.failed);
        assert_eq!(
            stored(&report),
            [
                long_name.clone(),
                format!("{}_1.txt", "a".repeat(249)),
                format!("{}_2.txt", "a".repeat(249)),
            ]
        );
        for name in stored(&report) {
            assert!(name.len() <= MAX_NAME_BYTES);
        }
        assert_eq!(
            fs::read(root.path().join(format!("{}_2.txt", "a".repeat(249)))).unwrap(),
            b"three"
        );
    }

    #[test]
    fn test_candidate_name_fits_limit() {
        assert_eq!(candidate_name("report", ".pdf", 3), "report_3.pdf");

        // Multi-byte stem is cut on a character boundary.
        let stem = "é".repeat(126);
        let name = candidate_name(&stem, ".md", 10);
        assert!(name.len() <= MAX_NAME_BYTES);
        assert!(name.ends_with("_10.md"));

        // An extension that fills the limit gives way to the counter.
        let ext = format!(".{}", "x".repeat(254));
        let name = candidate_name("", &ext, 1);
        assert_eq!(name.len(), MAX_NAME_BYTES);
        assert!(name.ends_with("_1"));
    }

    #[test]
    fn test_nested_name_creates_directories() {
        let (_temp, root) = setup();
        let report = ingest(
            &root,
            &RelativePath::parse("Documents").unwrap(),
            vec![item("sub/dir/file.txt", b"hello")],
            &UploadOptions::default(),
        )
        .unwrap();

        assert_eq!(stored(&report), ["Documents/sub/dir/file.txt"]);
        assert!(root.path().join("Documents/sub").is_dir());
        assert!(root.path().join("Documents/sub/dir").is_dir());
        assert_eq!(
            fs::read(root.path().join("Documents/sub/dir/file.txt")).unwrap(),
            b"hello"
        );
    }

    #[test]
    fn test_backslash_names_and_sanitizing() {
        let (_temp, root) = setup();
        let report = ingest(
            &root,
            &RelativePath::root(),
            vec![
                item("My Folder\\$$$\\holiday pic.jpg", b"x"),
                item("???", b"y"),
            ],
            &UploadOptions::default(),
        )
        .unwrap();
        assert_eq!(
            stored(&report),
            ["My_Folder/unnamed_folder/holiday_pic.jpg", "unnamed_file"]
        );
    }

    #[test]
    fn test_parent_segment_fails_only_that_item() {
        let (temp, root) = setup();
        let report = ingest(
            &root,
            &RelativePath::root(),
            vec![item("../../evil.sh", b"x"), item("good.txt", b"y")],
            &UploadOptions::default(),
        )
        .unwrap();

        assert_eq!(stored(&report), ["good.txt"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].original_name, "../../evil.sh");
        assert!(report.failed[0].error.is_escape());
        assert!(report.is_partial());
        assert!(!temp.path().join("evil.sh").exists());
    }

    #[test]
    fn test_empty_batch_has_no_valid_files() {
        let (_temp, root) = setup();
        let empty: Vec<UploadItem<Cursor<Vec<u8>>>> = Vec::new();
        assert!(matches!(
            ingest(&root, &RelativePath::root(), empty, &UploadOptions::default()),
            Err(StorageError::NoValidFiles)
        ));
        assert!(matches!(
            ingest(
                &root,
                &RelativePath::root(),
                vec![item("", b"x"), item("   ", b"y")],
                &UploadOptions::default()
            ),
            Err(StorageError::NoValidFiles)
        ));
    }

    #[test]
    fn test_blank_name_fails_alongside_valid() {
        let (_temp, root) = setup();
        let report = ingest(
            &root,
            &RelativePath::root(),
            vec![item(" ", b"x"), item("ok.txt", b"y")],
            &UploadOptions::default(),
        )
        .unwrap();
        assert_eq!(stored(&report), ["ok.txt"]);
        assert!(matches!(
            report.failed[0].error,
            StorageError::InvalidName(_)
        ));
    }

    #[test]
    fn test_size_limit_removes_partial_file() {
        let (_temp, root) = setup();
        let options = UploadOptions { max_file_size: 4 };
        let report = ingest(
            &root,
            &RelativePath::root(),
            vec![item("big.bin", b"12345"), item("fits.bin", b"1234")],
            &options,
        )
        .unwrap();

        assert_eq!(stored(&report), ["fits.bin"]);
        assert!(matches!(
            report.failed[0].error,
            StorageError::FileTooLarge { limit: 4 }
        ));
        assert!(!root.path().join("big.bin").exists());
    }

    #[test]
    fn test_read_failure_removes_partial_file() {
        let (_temp, root) = setup();
        let items: Vec<UploadItem<Box<dyn Read>>> = vec![
            UploadItem::new("broken.bin", Box::new(FailingReader { sent: false })),
            UploadItem::new("fine.bin", Box::new(Cursor::new(b"ok".to_vec()))),
        ];
        let report = ingest(&root, &RelativePath::root(), items, &UploadOptions::default())
            .unwrap();

        assert_eq!(stored(&report), ["fine.bin"]);
        assert!(matches!(report.failed[0].error, StorageError::Io { .. }));
        assert!(!root.path().join("broken.bin").exists());
    }

    #[test]
    fn test_reports_size_and_digest() {
        let (_temp, root) = setup();
        let report = ingest(
            &root,
            &RelativePath::root(),
            vec![item("hello.txt", b"hello")],
            &UploadOptions::default(),
        )
        .unwrap();

        let committed = &report.committed[0];
        assert_eq!(committed.size, 5);
        assert_eq!(
            committed.sha256,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_base_is_created_but_must_not_escape() {
        let (temp, root) = setup();
        let report = ingest(
            &root,
            &RelativePath::parse("new/base").unwrap(),
            vec![item("f.txt", b"x")],
            &UploadOptions::default(),
        )
        .unwrap();
        assert_eq!(stored(&report), ["new/base/f.txt"]);

        let outside = temp.path().join("outside");
        fs::create_dir(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, root.path().join("out")).unwrap();
        let err = ingest(
            &root,
            &RelativePath::parse("out").unwrap(),
            vec![item("f.txt", b"x")],
            &UploadOptions::default(),
        )
        .unwrap_err();
        assert!(err.is_escape());
        assert!(!outside.join("f.txt").exists());
    }

    #[test]
    fn test_concurrent_batches_never_overwrite() {
        let (_temp, root) = setup();
        let writers = 8;

        std::thread::scope(|scope| {
            for i in 0..writers {
                let root = &root;
                scope.spawn(move || {
                    let data = format!("writer-{i}");
                    ingest(
                        root,
                        &RelativePath::root(),
                        vec![item("same.txt", data.as_bytes())],
                        &UploadOptions::default(),
                    )
                    .unwrap();
                });
            }
        });

        let nodes = list(&root, &RelativePath::root(), MissingDirectory::Fail).unwrap();
        assert_eq!(nodes.len(), writers);
        let mut contents: Vec<String> = nodes
            .iter()
            .map(|n| fs::read_to_string(root.path().join(&n.name)).unwrap())
            .collect();
        contents.sort();
        contents.dedup();
        assert_eq!(contents.len(), writers);
    }
}
