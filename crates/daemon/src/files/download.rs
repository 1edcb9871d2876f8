//! Reading stored files back out.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use super::error::{StorageError, StorageResult};
use super::resolver::{RelativePath, StorageRoot};

/// Largest chunk served in one read (1 MiB).
pub const MAX_CHUNK_SIZE: u32 = 1024 * 1024;

/// A slice of a stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Bytes starting at the requested offset.
    pub data: Vec<u8>,
    /// Size of the whole file.
    pub total_size: u64,
    /// Whether this chunk reaches the end of the file.
    pub is_last: bool,
}

/// Resolve a path that must name an existing regular file.
pub fn resolve_for_read(root: &StorageRoot, rel: &RelativePath) -> StorageResult<PathBuf> {
    let path = root.resolver().resolve(rel)?;
    let metadata = fs::metadata(&path).map_err(|e| StorageError::from_io(e, &path, &rel.to_string()))?;
    if !metadata.is_file() {
        return Err(StorageError::NotAFile(rel.to_string()));
    }
    Ok(path)
}

/// Read up to `chunk_size` bytes of a file starting at `offset`.
///
/// `chunk_size` is capped at [`MAX_CHUNK_SIZE`]. An offset equal to the file
/// size yields an empty final chunk.
pub fn read_chunk(
    root: &StorageRoot,
    rel: &RelativePath,
    offset: u64,
    chunk_size: u32,
) -> StorageResult<Chunk> {
    let path = resolve_for_read(root, rel)?;
    let display = rel.to_string();

    let mut file = File::open(&path).map_err(|e| StorageError::from_io(e, &path, &display))?;
    let total_size = file
        .metadata()
        .map_err(|e| StorageError::from_io(e, &path, &display))?
        .len();

    if offset > total_size {
        return Err(StorageError::InvalidOffset {
            offset,
            size: total_size,
        });
    }

    file.seek(SeekFrom::Start(offset))
        .map_err(|e| StorageError::from_io(e, &path, &display))?;

    let wanted = u64::from(chunk_size.min(MAX_CHUNK_SIZE)).min(total_size - offset);
    let mut data = Vec::with_capacity(wanted as usize);
    file.take(wanted)
        .read_to_end(&mut data)
        .map_err(|e| StorageError::from_io(e, &path, &display))?;

    let is_last = offset + data.len() as u64 >= total_size;
    Ok(Chunk {
        data,
        total_size,
        is_last,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, StorageRoot) {
        let temp = TempDir::new().unwrap();
        let root_dir = temp.path().join("root");
        fs::create_dir(&root_dir).unwrap();
        let root = StorageRoot::open(&root_dir).unwrap();
        (temp, root)
    }

    fn rel(s: &str) -> RelativePath {
        RelativePath::parse(s).unwrap()
    }

    #[test]
    fn test_read_whole_file() {
        let (_temp, root) = setup();
        fs::write(root.path().join("f.txt"), b"Hello, World!").unwrap();

        let chunk = read_chunk(&root, &rel("f.txt"), 0, 1024).unwrap();
        assert_eq!(chunk.data, b"Hello, World!");
        assert_eq!(chunk.total_size, 13);
        assert!(chunk.is_last);
    }

    #[test]
    fn test_read_in_pieces() {
        let (_temp, root) = setup();
        fs::write(root.path().join("f.txt"), b"0123456789").unwrap();

        let first = read_chunk(&root, &rel("f.txt"), 0, 4).unwrap();
        assert_eq!(first.data, b"0123");
        assert!(!first.is_last);

        let last = read_chunk(&root, &rel("f.txt"), 8, 4).unwrap();
        assert_eq!(last.data, b"89");
        assert!(last.is_last);

        let end = read_chunk(&root, &rel("f.txt"), 10, 4).unwrap();
        assert!(end.data.is_empty());
        assert!(end.is_last);
    }

    #[test]
    fn test_offset_past_end() {
        let (_temp, root) = setup();
        fs::write(root.path().join("f.txt"), b"abc").unwrap();
        assert!(matches!(
            read_chunk(&root, &rel("f.txt"), 4, 4),
            Err(StorageError::InvalidOffset { offset: 4, size: 3 })
        ));
    }

    #[test]
    fn test_directory_is_not_a_file() {
        let (_temp, root) = setup();
        fs::create_dir(root.path().join("dir")).unwrap();
        assert!(matches!(
            resolve_for_read(&root, &rel("dir")),
            Err(StorageError::NotAFile(_))
        ));
        assert!(matches!(
            resolve_for_read(&root, &RelativePath::root()),
            Err(StorageError::NotAFile(_))
        ));
    }

    #[test]
    fn test_missing_and_escaping() {
        let (temp, root) = setup();
        assert!(matches!(
            resolve_for_read(&root, &rel("nope.txt")),
            Err(StorageError::NotFound(_))
        ));

        fs::write(temp.path().join("secret"), b"x").unwrap();
        std::os::unix::fs::symlink(temp.path().join("secret"), root.path().join("s")).unwrap();
        assert!(resolve_for_read(&root, &rel("s")).unwrap_err().is_escape());
    }
}
