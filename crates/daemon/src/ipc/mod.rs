//! Socket transport for the storage engine.
//!
//! The server exposes a [`MessageRouter`](crate::router::MessageRouter)
//! over a Unix Domain Socket so other local processes can use the engine.
//! Both directions carry [`protocol::Envelope`]s wrapped in frames:
//!
//! ```text
//! +--------+------------+-------+---------------------------+
//! | "FVLT" | length u32 | flags | MessagePack envelope      |
//! +--------+------------+-------+---------------------------+
//! ```
//!
//! A client sends one request at a time and waits for the reply carrying
//! the same sequence number. The first request on a connection is normally
//! `Bind`, which selects the identity whose storage root later requests
//! operate on.
//!
//! ## Example
//!
//! ```rust,no_run
//! use daemon::ipc::StorageClient;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), daemon::ipc::IpcError> {
//! let mut client = StorageClient::connect(Path::new("/run/user/1000/filevault/storage.sock")).await?;
//! client.bind(Some("alice")).await?;
//! assert!(client.ping().await?);
//! # Ok(())
//! # }
//! ```

mod client;
mod connection;
mod server;

pub use client::StorageClient;
pub use connection::{FramedConnection, IpcError};
pub use server::StorageServer;
