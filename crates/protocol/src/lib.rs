//! # FileVault Protocol Library
//!
//! This crate provides the wire protocol spoken between the FileVault
//! storage server and its clients.
//!
//! ## Overview
//!
//! - **Message Definitions**: request/response types for listing, uploading,
//!   downloading, deleting, directory creation and usage accounting
//! - **Frame Codec**: length-prefixed framing with optional LZ4 compression
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Application Messages           │  MessagePack-encoded
//! ├─────────────────────────────────────────┤
//! │              Framing                    │  Length-prefixed, LZ4
//! ├─────────────────────────────────────────┤
//! │        Transport (Unix socket)          │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Envelope, FrameCodec, Message};
//! use protocol::messages::FileListRequest;
//!
//! let message = Message::FileListRequest(FileListRequest {
//!     path: "Documents".to_string(),
//! });
//! let envelope = Envelope::new(1, message);
//!
//! let codec = FrameCodec::new();
//! let bytes = codec.encode_envelope(&envelope).unwrap();
//! let (frame, _) = codec.decode(&bytes).unwrap();
//! assert_eq!(codec.decode_envelope(&frame).unwrap(), envelope);
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Protocol message definitions
//! - [`framing`]: Frame codec with compression
//! - [`error`]: Error types

pub mod error;
pub mod framing;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use framing::{
    parse_prefix, Frame, FrameCodec, FrameFlags, COMPRESSION_THRESHOLD, FRAME_HEADER_SIZE,
    FRAME_MAGIC, FRAME_PREFIX_SIZE, MAX_FRAME_SIZE,
};
pub use messages::{Envelope, ErrorCode, Message, PROTOCOL_VERSION};
