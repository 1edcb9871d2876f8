//! Sandboxed storage engine.
//!
//! This module provides the filesystem operations behind FileVault:
//! - Path resolution confined to a storage root
//! - Directory listing, creation and recursive deletion
//! - Batch upload ingestion with collision-free naming
//! - Chunked reads for downloads
//! - Usage accounting
//!
//! # Security
//!
//! Every operation resolves its target through [`PathResolver`], which
//! canonicalizes paths and compares them component-wise against the root.
//! Symlinks whose targets lie outside the root are never followed.
//!
//! All functions here block on filesystem I/O. Async callers run them on
//! the blocking pool.

pub mod accounting;
pub mod download;
pub mod error;
pub mod resolver;
pub mod sanitize;
pub mod tenancy;
pub mod tree;
pub mod upload;

pub use accounting::{usage, UsageReport};
pub use download::{read_chunk, resolve_for_read, Chunk, MAX_CHUNK_SIZE};
pub use error::{StorageError, StorageResult};
pub use resolver::{validate_segment, PathResolver, RelativePath, StorageRoot};
pub use tenancy::{Identity, Tenancy, TenancyMode, DEFAULT_FOLDERS};
pub use tree::{DeletedKind, MissingDirectory, Node, NodeKind};
pub use upload::{
    ingest, CommittedItem, FailedItem, IngestReport, UploadItem, UploadOptions,
    DEFAULT_MAX_FILE_SIZE,
};
