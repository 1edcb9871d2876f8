//! Protocol message definitions for FileVault.
//!
//! This module defines all RPC message types used for communication between
//! the storage server and its clients. All messages are serialized using
//! MessagePack.
//!
//! Paths carried in messages are always *relative* to the storage root bound
//! to the connection, using `/` as the separator. The empty string denotes
//! the root itself.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest download chunk the server will return (1 MiB).
pub const MAX_CHUNK_SIZE: u32 = 1024 * 1024;

/// Default download chunk size (64 KiB).
pub const DEFAULT_CHUNK_SIZE: u32 = 64 * 1024;

/// Envelope wrapper for all protocol messages.
///
/// The envelope provides versioning and sequence numbers so a client can
/// match responses to requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version for compatibility checking.
    pub version: u8,
    /// Sequence number; responses echo the request's sequence.
    pub sequence: u64,
    /// The actual message payload.
    pub payload: Message,
}

impl Envelope {
    /// Create a new envelope with the current protocol version.
    pub fn new(sequence: u64, payload: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence,
            payload,
        }
    }

    /// Reject envelopes produced by an incompatible peer.
    pub fn check_version(&self) -> Result<()> {
        if self.version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: self.version,
            });
        }
        Ok(())
    }
}

/// Top-level message enum containing all message types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Message {
    // Connection messages
    /// Bind an identity to the connection.
    Bind(Bind),
    /// Confirmation of the bound identity.
    Bound(Bound),

    // Storage messages
    /// Request to list a directory.
    FileListRequest(FileListRequest),
    /// Response with directory listing.
    FileListResponse(FileListResponse),
    /// Request to create a directory.
    DirectoryCreate(DirectoryCreate),
    /// Directory creation confirmed.
    DirectoryCreated(DirectoryCreated),
    /// Request to delete a file or directory tree.
    FileDelete(FileDelete),
    /// Deletion confirmed.
    FileDeleted(FileDeleted),
    /// Upload a batch of named files.
    FileUploadBatch(FileUploadBatch),
    /// Per-item outcome of an upload batch.
    FileUploadResult(FileUploadResult),
    /// Request a chunk of a stored file.
    FileDownloadRequest(FileDownloadRequest),
    /// Chunk of downloaded file data.
    FileDownloadChunk(FileDownloadChunk),
    /// Request aggregate usage.
    UsageRequest(UsageRequest),
    /// Aggregate usage.
    UsageResponse(UsageResponse),

    // Control messages
    /// Ping for keepalive.
    Ping(Ping),
    /// Pong response to ping.
    Pong(Pong),
    /// Error message.
    Error(ErrorMessage),
}

impl Message {
    /// Whether this message is something a server should act on.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Message::Bind(_)
                | Message::FileListRequest(_)
                | Message::DirectoryCreate(_)
                | Message::FileDelete(_)
                | Message::FileUploadBatch(_)
                | Message::FileDownloadRequest(_)
                | Message::UsageRequest(_)
                | Message::Ping(_)
        )
    }
}

// ============================================================================
// Connection Messages
// ============================================================================

/// Attach an identity to the connection.
///
/// Authentication happens outside FileVault; the server trusts whoever can
/// reach its socket to name the identity. `None` selects the single shared
/// root in single-tenant deployments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bind {
    /// Identity whose storage root subsequent requests operate on.
    pub identity: Option<String>,
}

/// Confirmation of the bound identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bound {
    /// The identity now bound to the connection.
    pub identity: Option<String>,
}

// ============================================================================
// Storage Messages
// ============================================================================

/// Request to list files in a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileListRequest {
    /// Relative path to list.
    pub path: String,
}

/// Response with directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileListResponse {
    /// Path that was listed (normalized).
    pub path: String,
    /// Entries, directories first.
    pub entries: Vec<FileEntry>,
    /// Path segments from the root to the listed directory.
    pub breadcrumbs: Vec<String>,
}

/// A single file or directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry type.
    pub entry_type: FileEntryType,
    /// Size in bytes; `None` for directories.
    pub size: Option<u64>,
    /// Last modified timestamp (Unix epoch seconds).
    pub modified: u64,
    /// Path relative to the storage root.
    pub path: String,
}

/// Type of file entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileEntryType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

/// Request to create a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryCreate {
    /// Parent directory.
    pub path: String,
    /// Name of the new directory.
    pub name: String,
}

/// Directory creation confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryCreated {
    /// Path of the created directory.
    pub path: String,
}

/// Request to delete a file or directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDelete {
    /// Path to delete.
    pub path: String,
}

/// Deletion confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDeleted {
    /// Path that was deleted.
    pub path: String,
    /// What kind of entry was removed.
    pub entry_type: FileEntryType,
}

/// Upload a batch of files into a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUploadBatch {
    /// Destination directory; created if missing.
    pub path: String,
    /// Files to store.
    pub items: Vec<UploadPayload>,
}

/// One file in an upload batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPayload {
    /// Declared name; may contain `/`-separated subdirectories.
    pub name: String,
    /// File contents.
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

/// Outcome of an upload batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUploadResult {
    /// Destination directory.
    pub path: String,
    /// Items that were stored.
    pub committed: Vec<CommittedFile>,
    /// Items that were rejected.
    pub failed: Vec<FailedFile>,
    /// Batch summary.
    pub status: UploadStatus,
}

/// A stored upload item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedFile {
    /// Name as declared by the client.
    pub original_name: String,
    /// Final path relative to the storage root.
    pub stored_path: String,
    /// Bytes written.
    pub size: u64,
    /// Hex SHA-256 of the written bytes.
    pub sha256: String,
}

/// A rejected upload item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFile {
    /// Name as declared by the client.
    pub original_name: String,
    /// Why it was rejected.
    pub code: ErrorCode,
    /// Diagnostic detail.
    pub reason: String,
}

/// Summary status of an upload batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStatus {
    /// Every item was stored.
    Complete,
    /// Some items failed; the rest were stored.
    PartialFailure,
}

/// Request to download a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDownloadRequest {
    /// Path to download.
    pub path: String,
    /// Starting offset (for resuming).
    pub offset: u64,
    /// Maximum chunk size.
    pub chunk_size: u32,
}

/// Chunk of downloaded file data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDownloadChunk {
    /// Path being downloaded.
    pub path: String,
    /// Offset of this chunk.
    pub offset: u64,
    /// Total file size.
    pub total_size: u64,
    /// The chunk data.
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    /// Whether this is the last chunk.
    pub is_last: bool,
}

/// Request aggregate usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UsageRequest {
    /// Subtree to measure; `None` measures the whole root.
    pub path: Option<String>,
}

/// Aggregate usage of a subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageResponse {
    /// Sum of file sizes in bytes.
    pub total_bytes: u64,
    /// Number of regular files.
    pub file_count: u64,
    /// Number of directories below the measured one.
    pub directory_count: u64,
}

// ============================================================================
// Control Messages
// ============================================================================

/// Ping for keepalive and latency measurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    /// Timestamp when ping was sent (for latency calculation).
    pub timestamp: u64,
}

/// Pong response to ping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    /// Original timestamp from ping.
    pub timestamp: u64,
}

/// Error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error code for programmatic handling.
    pub code: ErrorCode,
    /// Diagnostic message; clients render their own text from `code`.
    pub message: String,
    /// Optional context (usually the path involved).
    pub context: Option<String>,
    /// Whether retrying the same request could succeed.
    pub recoverable: bool,
}

/// Error codes for common error conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Unknown or unspecified error.
    Unknown,
    /// No usable identity bound, or identity unknown.
    Unauthorized,
    /// Path would leave the storage sandbox.
    PathEscape,
    /// Resource not found.
    NotFound,
    /// Resource already exists.
    AlreadyExists,
    /// Insufficient permissions on the storage medium.
    PermissionDenied,
    /// Name is empty or not a single segment.
    InvalidName,
    /// Expected a directory.
    NotADirectory,
    /// Expected a regular file.
    NotAFile,
    /// Upload batch had nothing usable.
    NoValidFiles,
    /// Upload item exceeds the size limit.
    FileTooLarge,
    /// Invalid request or parameters.
    InvalidRequest,
    /// Storage medium failure.
    IoError,
    /// Server-side error.
    InternalError,
    /// Request timed out.
    Timeout,
    /// Protocol version mismatch.
    VersionMismatch,
}

// ============================================================================
// Serialization helpers
// ============================================================================

impl Envelope {
    /// Serialize the envelope to MessagePack bytes.
    pub fn to_msgpack(&self) -> std::result::Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    /// Deserialize an envelope from MessagePack bytes.
    pub fn from_msgpack(bytes: &[u8]) -> std::result::Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}
