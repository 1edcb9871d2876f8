//! # FileVault Daemon Library
//!
//! This crate provides sandboxed, per-identity file storage: a storage
//! engine confined to a root directory, and a Unix socket server that
//! exposes it to local clients.
//!
//! ## Overview
//!
//! - **Path Containment**: every request path is resolved beneath a storage
//!   root; traversal and escaping symlinks are rejected
//! - **Tenancy**: one shared root, or one root per identity
//! - **Uploads**: batch ingestion with collision-free naming, size limits and
//!   SHA-256 digests
//! - **Browsing**: sorted listings, directory creation, recursive deletion
//! - **Accounting**: byte and file counts for a root or subtree
//! - **Server**: framed request/response protocol over a Unix socket
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │          StorageServer  (one task per connection)               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │          MessageRouter  (requests -> blocking pool)             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │          StorageService (tenancy + policy)                      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────────────┐    │
//! │  │ Resolver │ │   Tree   │ │  Upload  │ │ Accounting/Reads │    │
//! │  └──────────┘ └──────────┘ └──────────┘ └──────────────────┘    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::files::{RelativePath, Tenancy, TenancyMode};
//! use daemon::StorageService;
//!
//! fn main() -> anyhow::Result<()> {
//!     let tenancy = Tenancy::create(TenancyMode::Single, "/srv/filevault")?;
//!     let service = StorageService::new(tenancy);
//!     let root = service.provision(None)?;
//!
//!     for node in service.list(&root, &RelativePath::root())? {
//!         println!("{}", node.name);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`files`]: Sandboxed storage engine
//! - [`service`]: Engine facade carrying deployment policy
//! - [`router`]: Message routing to the service
//! - [`ipc`]: Unix socket server and client

pub mod config;
pub mod files;
pub mod ipc;
pub mod router;
pub mod service;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::Config;

// Re-export storage types for convenience
pub use files::{
    Identity, IngestReport, MissingDirectory, Node, NodeKind, RelativePath, StorageError,
    StorageResult, StorageRoot, Tenancy, TenancyMode, UsageReport,
};

// Re-export service and router types for convenience
pub use router::{MessageRouter, RouterError, RouterResult};
pub use service::StorageService;

// Re-export transport types for convenience
pub use ipc::{IpcError, StorageClient, StorageServer};
