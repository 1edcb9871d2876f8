//! Message router for dispatching requests to the storage service.
//!
//! This module provides the `MessageRouter` struct that receives protocol
//! messages and turns them into [`StorageService`] calls. Storage calls block
//! on filesystem I/O, so each one runs on tokio's blocking pool.

use std::io::Cursor;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use protocol::messages::{
    Bind, Bound, CommittedFile, DirectoryCreate, DirectoryCreated, ErrorCode, ErrorMessage,
    FailedFile, FileDelete, FileDeleted, FileDownloadChunk, FileDownloadRequest, FileEntry,
    FileEntryType, FileListRequest, FileListResponse, FileUploadBatch, FileUploadResult, Message,
    Ping, Pong, UploadStatus, UsageRequest, UsageResponse, DEFAULT_CHUNK_SIZE,
};
use tracing::{debug, info, warn};

use crate::files::{
    DeletedKind, Identity, IngestReport, Node, NodeKind, RelativePath, StorageError,
    StorageResult, StorageRoot, UploadItem,
};
use crate::service::StorageService;

/// Result type for router operations.
pub type RouterResult = Result<Option<Message>, RouterError>;

/// Errors that can occur during message routing.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Storage operation failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RouterError {
    /// Convert the error to a protocol ErrorMessage.
    pub fn to_error_message(&self, context: Option<String>) -> ErrorMessage {
        let (code, recoverable) = match self {
            RouterError::Storage(e) => storage_error_code(e),
            RouterError::InvalidRequest(_) => (ErrorCode::InvalidRequest, false),
            RouterError::Internal(_) => (ErrorCode::InternalError, true),
        };

        ErrorMessage {
            code,
            message: self.to_string(),
            context,
            recoverable,
        }
    }
}

/// Protocol error code for a storage failure, and whether retrying may help.
pub fn storage_error_code(error: &StorageError) -> (ErrorCode, bool) {
    match error {
        StorageError::PathEscape(_) => (ErrorCode::PathEscape, false),
        StorageError::NotFound(_) => (ErrorCode::NotFound, false),
        StorageError::AlreadyExists(_) => (ErrorCode::AlreadyExists, false),
        StorageError::PermissionDenied(_) => (ErrorCode::PermissionDenied, false),
        StorageError::InvalidName(_) => (ErrorCode::InvalidName, false),
        StorageError::NotADirectory(_) => (ErrorCode::NotADirectory, false),
        StorageError::NotAFile(_) => (ErrorCode::NotAFile, false),
        StorageError::NoValidFiles => (ErrorCode::NoValidFiles, false),
        StorageError::FileTooLarge { .. } => (ErrorCode::FileTooLarge, false),
        StorageError::InvalidOffset { .. } => (ErrorCode::InvalidRequest, false),
        StorageError::UnknownIdentity(_) => (ErrorCode::Unauthorized, false),
        StorageError::Io { .. } => (ErrorCode::IoError, true),
    }
}

/// Whether a request changes stored data.
///
/// Such requests cannot be abandoned halfway once the blocking call has
/// started, so they are always run to completion.
pub fn is_mutation(message: &Message) -> bool {
    matches!(
        message,
        Message::DirectoryCreate(_) | Message::FileDelete(_) | Message::FileUploadBatch(_)
    )
}

/// Message router that dispatches requests to the storage service.
pub struct MessageRouter {
    service: Arc<StorageService>,
}

impl MessageRouter {
    /// Create a new message router over `service`.
    pub fn new(service: Arc<StorageService>) -> Self {
        Self { service }
    }

    /// The service requests are dispatched to.
    pub fn service(&self) -> &Arc<StorageService> {
        &self.service
    }

    /// Route a message on behalf of `identity`.
    ///
    /// Returns the response to send back, or `None` for messages that need
    /// no reply.
    pub async fn route(&self, message: Message, identity: Option<&Identity>) -> RouterResult {
        debug!(?identity, "Routing message");

        match message {
            Message::Bind(req) => self.handle_bind(req).await,
            Message::FileListRequest(req) => self.handle_file_list(req, identity).await,
            Message::DirectoryCreate(req) => self.handle_directory_create(req, identity).await,
            Message::FileDelete(req) => self.handle_file_delete(req, identity).await,
            Message::FileUploadBatch(req) => self.handle_file_upload(req, identity).await,
            Message::FileDownloadRequest(req) => self.handle_file_download(req, identity).await,
            Message::UsageRequest(req) => self.handle_usage(req, identity).await,
            Message::Ping(ping) => self.handle_ping(ping).await,

            Message::Bound(_)
            | Message::FileListResponse(_)
            | Message::DirectoryCreated(_)
            | Message::FileDeleted(_)
            | Message::FileUploadResult(_)
            | Message::FileDownloadChunk(_)
            | Message::UsageResponse(_)
            | Message::Pong(_) => {
                // These are response messages, not requests - ignore them
                debug!("Ignoring response message received as request");
                Ok(None)
            }
            Message::Error(err) => {
                warn!(?err, "Received error from peer");
                Ok(None)
            }
        }
    }

    /// Run a storage call on the blocking pool against the caller's root.
    async fn with_root<T, F>(&self, identity: Option<&Identity>, op: F) -> Result<T, RouterError>
    where
        T: Send + 'static,
        F: FnOnce(&StorageService, &StorageRoot) -> StorageResult<T>
            + Send
            + 'static,
    {
        let service = Arc::clone(&self.service);
        let identity = identity.cloned();

        let result = tokio::task::spawn_blocking(move || {
            let root = service.root_for(identity.as_ref())?;
            op(&service, &root)
        })
        .await
        .map_err(|e| RouterError::Internal(format!("storage task failed: {}", e)))?;

        Ok(result?)
    }

    // =========================================================================
    // Connection Handlers
    // =========================================================================

    async fn handle_bind(&self, req: Bind) -> RouterResult {
        let identity = req.identity.map(Identity::new).transpose()?;

        // Only bind to identities that already have a root.
        self.with_root(identity.as_ref(), |_, _| Ok(())).await?;

        info!(identity = ?identity, "Connection bound");
        Ok(Some(Message::Bound(Bound {
            identity: identity.map(|i| i.as_str().to_string()),
        })))
    }

    // =========================================================================
    // Storage Handlers
    // =========================================================================

    async fn handle_file_list(
        &self,
        req: FileListRequest,
        identity: Option<&Identity>,
    ) -> RouterResult {
        debug!(path = %req.path, "Listing directory");

        let rel = RelativePath::parse(&req.path)?;
        let target = rel.clone();
        let nodes = self
            .with_root(identity, move |service, root| service.list(root, &target))
            .await?;

        Ok(Some(Message::FileListResponse(FileListResponse {
            path: rel.to_string(),
            entries: nodes.iter().map(node_to_entry).collect(),
            breadcrumbs: rel.breadcrumbs(),
        })))
    }

    async fn handle_directory_create(
        &self,
        req: DirectoryCreate,
        identity: Option<&Identity>,
    ) -> RouterResult {
        debug!(path = %req.path, name = %req.name, "Creating directory");

        let parent = RelativePath::parse(&req.path)?;
        let name = req.name;
        let created = self
            .with_root(identity, move |service, root| {
                service.make_directory(root, &parent, &name)
            })
            .await?;

        Ok(Some(Message::DirectoryCreated(DirectoryCreated {
            path: created.to_string(),
        })))
    }

    async fn handle_file_delete(&self, req: FileDelete, identity: Option<&Identity>) -> RouterResult {
        debug!(path = %req.path, "Deleting");

        let rel = RelativePath::parse(&req.path)?;
        let target = rel.clone();
        let kind = self
            .with_root(identity, move |service, root| service.delete(root, &target))
            .await?;

        let entry_type = match kind {
            DeletedKind::Directory => FileEntryType::Directory,
            DeletedKind::File | DeletedKind::Symlink => FileEntryType::File,
        };
        Ok(Some(Message::FileDeleted(FileDeleted {
            path: rel.to_string(),
            entry_type,
        })))
    }

    async fn handle_file_upload(
        &self,
        req: FileUploadBatch,
        identity: Option<&Identity>,
    ) -> RouterResult {
        debug!(path = %req.path, items = req.items.len(), "Uploading batch");

        let max = self.service.max_batch_items();
        if req.items.len() > max {
            return Err(RouterError::InvalidRequest(format!(
                "batch of {} items exceeds limit of {}",
                req.items.len(),
                max
            )));
        }

        let base = RelativePath::parse(&req.path)?;
        let target = base.clone();
        let items: Vec<_> = req
            .items
            .into_iter()
            .map(|item| UploadItem::new(item.name, Cursor::new(item.data)))
            .collect();

        let report = self
            .with_root(identity, move |service, root| {
                service.ingest(root, &target, items)
            })
            .await?;

        Ok(Some(Message::FileUploadResult(upload_result(&base, report))))
    }

    async fn handle_file_download(
        &self,
        req: FileDownloadRequest,
        identity: Option<&Identity>,
    ) -> RouterResult {
        debug!(
            path = %req.path,
            offset = req.offset,
            chunk_size = req.chunk_size,
            "Downloading file chunk"
        );

        let rel = RelativePath::parse(&req.path)?;
        let chunk_size = if req.chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            req.chunk_size
        };
        let offset = req.offset;
        let target = rel.clone();
        let chunk = self
            .with_root(identity, move |service, root| {
                service.read_chunk(root, &target, offset, chunk_size)
            })
            .await?;

        Ok(Some(Message::FileDownloadChunk(FileDownloadChunk {
            path: rel.to_string(),
            offset,
            total_size: chunk.total_size,
            data: chunk.data,
            is_last: chunk.is_last,
        })))
    }

    async fn handle_usage(&self, req: UsageRequest, identity: Option<&Identity>) -> RouterResult {
        let rel = req
            .path
            .as_deref()
            .map(RelativePath::parse)
            .transpose()?;
        let report = self
            .with_root(identity, move |service, root| service.usage(root, rel.as_ref()))
            .await?;

        Ok(Some(Message::UsageResponse(UsageResponse {
            total_bytes: report.total_bytes,
            file_count: report.file_count,
            directory_count: report.directory_count,
        })))
    }

    // =========================================================================
    // Control Handlers
    // =========================================================================

    async fn handle_ping(&self, ping: Ping) -> RouterResult {
        debug!(timestamp = ping.timestamp, "Received ping");

        Ok(Some(Message::Pong(Pong {
            timestamp: ping.timestamp,
        })))
    }
}

/// Protocol form of an ingest report for a batch stored beneath `base`.
pub fn upload_result(base: &RelativePath, report: IngestReport) -> FileUploadResult {
    let status = if report.is_partial() {
        UploadStatus::PartialFailure
    } else {
        UploadStatus::Complete
    };

    FileUploadResult {
        path: base.to_string(),
        committed: report
            .committed
            .into_iter()
            .map(|c| CommittedFile {
                original_name: c.original_name,
                stored_path: c.stored_path.to_string(),
                size: c.size,
                sha256: c.sha256,
            })
            .collect(),
        failed: report
            .failed
            .into_iter()
            .map(|f| FailedFile {
                code: storage_error_code(&f.error).0,
                reason: f.error.to_string(),
                original_name: f.original_name,
            })
            .collect(),
        status,
    }
}

fn node_to_entry(node: &Node) -> FileEntry {
    let modified = node
        .modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    FileEntry {
        name: node.name.clone(),
        entry_type: match node.kind {
            NodeKind::Directory => FileEntryType::Directory,
            NodeKind::File => FileEntryType::File,
        },
        size: node.size,
        modified,
        path: node.path.to_string(),
    }
}

/// Helper function to get current timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
