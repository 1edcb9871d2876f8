//! Storage service facade.
//!
//! [`StorageService`] bundles the engine in [`crate::files`] with the
//! deployment policy from configuration: tenancy, the missing-directory
//! behavior of listings, and upload limits. Every method blocks.

use std::io::Read;
use std::path::PathBuf;

use tracing::debug;

use crate::config::Config;
use crate::files::{
    accounting, download, tree, upload, Chunk, DeletedKind, Identity, IngestReport,
    MissingDirectory, Node, RelativePath, StorageResult, StorageRoot, Tenancy, UploadItem,
    UploadOptions, UsageReport, DEFAULT_FOLDERS,
};

/// Default cap on items per upload batch.
pub const DEFAULT_MAX_BATCH_ITEMS: usize = 1000;

/// Entry point for all storage operations.
#[derive(Debug, Clone)]
pub struct StorageService {
    tenancy: Tenancy,
    missing_directory: MissingDirectory,
    upload: UploadOptions,
    max_batch_items: usize,
    default_folders: Vec<String>,
}

impl StorageService {
    /// Create a service with default policy.
    pub fn new(tenancy: Tenancy) -> Self {
        Self {
            tenancy,
            missing_directory: MissingDirectory::default(),
            upload: UploadOptions::default(),
            max_batch_items: DEFAULT_MAX_BATCH_ITEMS,
            default_folders: DEFAULT_FOLDERS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Build a service from configuration, creating the storage root if
    /// it does not exist yet.
    pub fn from_config(config: &Config) -> StorageResult<Self> {
        let tenancy = Tenancy::create(config.storage.tenancy, &config.storage.root)?;
        Ok(Self::new(tenancy)
            .with_missing_directory(config.storage.missing_directory)
            .with_upload_options(UploadOptions {
                max_file_size: config.upload.max_file_size,
            })
            .with_max_batch_items(config.upload.max_batch_items)
            .with_default_folders(config.storage.default_folders.clone()))
    }

    /// Set the missing-directory policy for listings.
    pub fn with_missing_directory(mut self, policy: MissingDirectory) -> Self {
        self.missing_directory = policy;
        self
    }

    /// Set upload limits.
    pub fn with_upload_options(mut self, options: UploadOptions) -> Self {
        self.upload = options;
        self
    }

    /// Set the maximum number of items in one batch.
    pub fn with_max_batch_items(mut self, max: usize) -> Self {
        self.max_batch_items = max;
        self
    }

    /// Set the folders created by [`provision`](Self::provision).
    pub fn with_default_folders(mut self, folders: Vec<String>) -> Self {
        self.default_folders = folders;
        self
    }

    /// Tenancy in effect.
    pub fn tenancy(&self) -> &Tenancy {
        &self.tenancy
    }

    /// Upload limits in effect.
    pub fn upload_options(&self) -> &UploadOptions {
        &self.upload
    }

    /// Maximum number of items accepted in one batch.
    pub fn max_batch_items(&self) -> usize {
        self.max_batch_items
    }

    /// Root for an already-provisioned identity.
    pub fn root_for(&self, identity: Option<&Identity>) -> StorageResult<StorageRoot> {
        self.tenancy.root_for(identity)
    }

    /// Create (or complete) the root for an identity.
    pub fn provision(&self, identity: Option<&Identity>) -> StorageResult<StorageRoot> {
        self.tenancy.provision(identity, &self.default_folders)
    }

    /// List a directory using the configured missing-directory policy.
    pub fn list(&self, root: &StorageRoot, rel: &RelativePath) -> StorageResult<Vec<Node>> {
        tree::list(root, rel, self.missing_directory)
    }

    /// Create a directory named `name` inside `parent`.
    pub fn make_directory(
        &self,
        root: &StorageRoot,
        parent: &RelativePath,
        name: &str,
    ) -> StorageResult<RelativePath> {
        tree::make_directory(root, parent, name)
    }

    /// Delete a file, directory tree or symlink.
    pub fn delete(&self, root: &StorageRoot, rel: &RelativePath) -> StorageResult<DeletedKind> {
        tree::delete(root, rel)
    }

    /// Ingest a batch of uploads beneath `base`.
    pub fn ingest<R, I>(
        &self,
        root: &StorageRoot,
        base: &RelativePath,
        items: I,
    ) -> StorageResult<IngestReport>
    where
        R: Read,
        I: IntoIterator<Item = UploadItem<R>>,
    {
        upload::ingest(root, base, items, &self.upload)
    }

    /// Absolute path of an existing regular file, for streaming reads.
    pub fn resolve_for_read(&self, root: &StorageRoot, rel: &RelativePath) -> StorageResult<PathBuf> {
        download::resolve_for_read(root, rel)
    }

    /// Read one chunk of a stored file.
    pub fn read_chunk(
        &self,
        root: &StorageRoot,
        rel: &RelativePath,
        offset: u64,
        chunk_size: u32,
    ) -> StorageResult<Chunk> {
        download::read_chunk(root, rel, offset, chunk_size)
    }

    /// Usage beneath `rel`, or the whole root when `None`.
    pub fn usage(
        &self,
        root: &StorageRoot,
        rel: Option<&RelativePath>,
    ) -> StorageResult<UsageReport> {
        let start = rel.cloned().unwrap_or_default();
        debug!(path = %start, "Usage requested");
        accounting::usage(root, &start)
    }
}
