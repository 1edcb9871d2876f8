//! Path resolution and sandbox containment.
//!
//! Every filesystem operation goes through [`PathResolver`], which turns a
//! caller-supplied [`RelativePath`] into an absolute path that is guaranteed
//! to be the storage root or a component-wise descendant of it. Containment
//! is always checked on canonical paths, so symlinks and `..` cannot be used
//! to step outside the root.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::error::{StorageError, StorageResult};

/// A canonical directory beneath which all operations are confined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRoot {
    path: PathBuf,
}

impl StorageRoot {
    /// Open an existing root directory.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let canonical =
            fs::canonicalize(path).map_err(|e| StorageError::from_io(e, path, &display))?;
        if !canonical.is_dir() {
            return Err(StorageError::NotADirectory(display));
        }
        Ok(Self { path: canonical })
    }

    /// Create the root directory (and parents) if missing, then open it.
    pub fn create(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path)
            .map_err(|e| StorageError::from_io(e, path, &path.display().to_string()))?;
        Self::open(path)
    }

    /// Canonical absolute path of the root.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolver bound to this root.
    pub fn resolver(&self) -> PathResolver<'_> {
        PathResolver::new(self)
    }
}

/// A normalized path relative to a storage root.
///
/// Segments are never empty, `.` or `..`. The empty path denotes the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelativePath {
    segments: Vec<String>,
}

impl RelativePath {
    /// The root itself.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a caller-supplied path.
    ///
    /// Both `/` and `\` separate segments. Empty and `.` segments are
    /// dropped. A `..` segment, a leading separator, a drive prefix or a NUL
    /// byte fail with [`StorageError::PathEscape`].
    pub fn parse(input: &str) -> StorageResult<Self> {
        if input.contains('\0') || input.starts_with(['/', '\\']) || has_drive_prefix(input) {
            return Err(StorageError::PathEscape(input.to_string()));
        }

        let mut segments = Vec::new();
        for segment in input.split(['/', '\\']) {
            match segment {
                "" | "." => continue,
                ".." => return Err(StorageError::PathEscape(input.to_string())),
                other => segments.push(other.to_string()),
            }
        }
        Ok(Self { segments })
    }

    /// Path segments, outermost first.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Whether this path denotes the root.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Append a single segment.
    ///
    /// The segment must already be a valid name (see
    /// [`validate_segment`]).
    pub fn join(&self, segment: &str) -> Self {
        debug_assert!(validate_segment(segment).is_ok());
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Self { segments }
    }

    /// The containing directory, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self { segments })
    }

    /// Last segment, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Segments for navigation display.
    pub fn breadcrumbs(&self) -> Vec<String> {
        self.segments.clone()
    }

    fn to_path_under(&self, base: &Path) -> PathBuf {
        let mut path = base.to_path_buf();
        path.extend(&self.segments);
        path
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// Check that `name` is usable as a single path segment.
pub fn validate_segment(name: &str) -> StorageResult<&str> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
    {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(name)
}

fn has_drive_prefix(input: &str) -> bool {
    let bytes = input.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Resolves relative paths against a [`StorageRoot`].
#[derive(Debug, Clone, Copy)]
pub struct PathResolver<'a> {
    root: &'a StorageRoot,
}

impl<'a> PathResolver<'a> {
    /// Create a resolver for `root`.
    pub fn new(root: &'a StorageRoot) -> Self {
        Self { root }
    }

    /// The root this resolver confines paths to.
    pub fn root(&self) -> &'a StorageRoot {
        self.root
    }

    /// Resolve a path that must already exist.
    ///
    /// Symlinks are followed; the canonical target must lie inside the root.
    pub fn resolve(&self, rel: &RelativePath) -> StorageResult<PathBuf> {
        let joined = rel.to_path_under(self.root.path());
        let canonical = fs::canonicalize(&joined).map_err(|e| {
            if is_missing(&e) {
                StorageError::NotFound(rel.to_string())
            } else {
                StorageError::from_io(e, &joined, &rel.to_string())
            }
        })?;
        self.ensure_contained(&canonical, rel)?;
        Ok(canonical)
    }

    /// Resolve a path that may not exist yet.
    ///
    /// The deepest existing ancestor is canonicalized and checked, and must
    /// be a directory. The missing tail is appended verbatim. If the target
    /// already exists its canonical path is returned.
    pub fn resolve_for_creation(&self, rel: &RelativePath) -> StorageResult<PathBuf> {
        let segments = rel.segments();

        for depth in (0..=segments.len()).rev() {
            let prefix = RelativePath {
                segments: segments[..depth].to_vec(),
            };
            let joined = prefix.to_path_under(self.root.path());

            let canonical = match fs::canonicalize(&joined) {
                Ok(canonical) => canonical,
                Err(e) if is_missing(&e) && depth > 0 => continue,
                Err(e) => return Err(StorageError::from_io(e, &joined, &prefix.to_string())),
            };
            self.ensure_contained(&canonical, rel)?;

            if depth == segments.len() {
                return Ok(canonical);
            }
            if !canonical.is_dir() {
                return Err(StorageError::NotADirectory(prefix.to_string()));
            }

            // The next component does not canonicalize but may still exist
            // as a link to nowhere. Creating through it would write wherever
            // it points.
            let next = canonical.join(&segments[depth]);
            if fs::symlink_metadata(&next).is_ok() {
                return Err(StorageError::PathEscape(rel.to_string()));
            }

            let mut resolved = canonical;
            resolved.extend(&segments[depth..]);
            return Ok(resolved);
        }

        Err(StorageError::NotFound(rel.to_string()))
    }

    /// Whether a canonical path lies within the root.
    pub fn contains(&self, canonical: &Path) -> bool {
        canonical.starts_with(self.root.path())
    }

    fn ensure_contained(&self, canonical: &Path, rel: &RelativePath) -> StorageResult<()> {
        if self.contains(canonical) {
            Ok(())
        } else {
            Err(StorageError::PathEscape(rel.to_string()))
        }
    }
}

fn is_missing(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn setup() -> (TempDir, StorageRoot) {
        let temp = TempDir::new().unwrap();
        let root_dir = temp.path().join("acct");
        fs::create_dir(&root_dir).unwrap();
        let root = StorageRoot::open(&root_dir).unwrap();
        (temp, root)
    }

    #[test]
    fn test_parse_normalizes() {
        let rel = RelativePath::parse("a//./b\\c/").unwrap();
        assert_eq!(rel.segments(), ["a", "b", "c"]);
        assert_eq!(rel.to_string(), "a/b/c");
        assert!(RelativePath::parse("").unwrap().is_root());
        assert!(RelativePath::parse("./.").unwrap().is_root());
    }

    #[test]
    fn test_parse_rejects_escapes() {
        for input in [
            "..",
            "../etc",
            "a/../../b",
            "a/..",
            "a\\..\\b",
            "/etc/passwd",
            "\\server\\share",
            "C:\\Windows",
            "c:foo",
            "a\0b",
        ] {
            let err = RelativePath::parse(input).unwrap_err();
            assert!(err.is_escape(), "{input:?} should escape, got {err:?}");
        }
    }

    #[test]
    fn test_parse_allows_dots_inside_names() {
        let rel = RelativePath::parse("notes..txt/...").unwrap();
        assert_eq!(rel.segments(), ["notes..txt", "..."]);
    }

    #[test]
    fn test_parent_and_file_name() {
        let rel = RelativePath::parse("a/b").unwrap();
        assert_eq!(rel.file_name(), Some("b"));
        assert_eq!(rel.parent().unwrap().to_string(), "a");
        assert_eq!(rel.breadcrumbs(), vec!["a".to_string(), "b".to_string()]);
        assert!(RelativePath::root().parent().is_none());
    }

    #[test]
    fn test_validate_segment() {
        assert!(validate_segment("photos").is_ok());
        assert!(validate_segment("..hidden").is_ok());
        for bad in ["", ".", "..", "a/b", "a\\b"] {
            assert!(matches!(
                validate_segment(bad),
                Err(StorageError::InvalidName(_))
            ));
        }
    }

    #[test]
    fn test_resolve_existing() {
        let (_temp, root) = setup();
        fs::create_dir_all(root.path().join("Documents/work")).unwrap();

        let resolver = root.resolver();
        let resolved = resolver
            .resolve(&RelativePath::parse("Documents/work").unwrap())
            .unwrap();
        assert!(resolved.starts_with(root.path()));
        assert_eq!(resolved, root.path().join("Documents/work"));
        assert_eq!(resolver.resolve(&RelativePath::root()).unwrap(), root.path());
    }

    #[test]
    fn test_resolve_missing_is_not_found() {
        let (_temp, root) = setup();
        let err = root
            .resolver()
            .resolve(&RelativePath::parse("nope").unwrap())
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn test_resolve_rejects_symlink_outside() {
        let (temp, root) = setup();
        let outside = temp.path().join("outside");
        fs::create_dir(&outside).unwrap();
        fs::write(outside.join("secret"), b"x").unwrap();
        symlink(&outside, root.path().join("link")).unwrap();

        let resolver = root.resolver();
        for input in ["link", "link/secret"] {
            let err = resolver
                .resolve(&RelativePath::parse(input).unwrap())
                .unwrap_err();
            assert!(err.is_escape(), "{input}: {err:?}");
        }
    }

    #[test]
    fn test_sibling_with_shared_prefix_is_outside() {
        let (temp, root) = setup();
        // `acct2` shares a string prefix with `acct` but is not beneath it.
        let sibling = temp.path().join("acct2");
        fs::create_dir(&sibling).unwrap();
        symlink(&sibling, root.path().join("sib")).unwrap();

        let err = root
            .resolver()
            .resolve(&RelativePath::parse("sib").unwrap())
            .unwrap_err();
        assert!(err.is_escape());
    }

    #[test]
    fn test_resolve_follows_symlink_inside() {
        let (_temp, root) = setup();
        fs::create_dir(root.path().join("real")).unwrap();
        symlink(root.path().join("real"), root.path().join("alias")).unwrap();

        let resolved = root
            .resolver()
            .resolve(&RelativePath::parse("alias").unwrap())
            .unwrap();
        assert_eq!(resolved, root.path().join("real"));
    }

    #[test]
    fn test_resolve_for_creation_appends_missing_tail() {
        let (_temp, root) = setup();
        fs::create_dir(root.path().join("a")).unwrap();

        let resolved = root
            .resolver()
            .resolve_for_creation(&RelativePath::parse("a/b/c.txt").unwrap())
            .unwrap();
        assert_eq!(resolved, root.path().join("a/b/c.txt"));
    }

    #[test]
    fn test_resolve_for_creation_through_file_fails() {
        let (_temp, root) = setup();
        fs::write(root.path().join("file.txt"), b"x").unwrap();

        let err = root
            .resolver()
            .resolve_for_creation(&RelativePath::parse("file.txt/child").unwrap())
            .unwrap_err();
        assert!(matches!(err, StorageError::NotADirectory(_)));
    }

    #[test]
    fn test_resolve_for_creation_rejects_escaping_ancestor() {
        let (temp, root) = setup();
        let outside = temp.path().join("outside");
        fs::create_dir(&outside).unwrap();
        symlink(&outside, root.path().join("out")).unwrap();

        let err = root
            .resolver()
            .resolve_for_creation(&RelativePath::parse("out/new/file").unwrap())
            .unwrap_err();
        assert!(err.is_escape());
        assert!(!outside.join("new").exists());
    }

    #[test]
    fn test_resolve_for_creation_rejects_dangling_symlink() {
        let (temp, root) = setup();
        let target = temp.path().join("not-yet");
        symlink(&target, root.path().join("dangling")).unwrap();

        let err = root
            .resolver()
            .resolve_for_creation(&RelativePath::parse("dangling").unwrap())
            .unwrap_err();
        assert!(err.is_escape());
    }

    #[test]
    fn test_open_rejects_file_root() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("f");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            StorageRoot::open(&file),
            Err(StorageError::NotADirectory(_))
        ));
    }
}
