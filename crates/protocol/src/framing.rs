//! Frame codec for length-prefixed framing with optional LZ4 compression.
//!
//! # Frame Format
//!
//! Each frame consists of:
//! - 4 bytes: magic bytes "FVLT"
//! - 4 bytes: content length (big-endian, includes flags byte)
//! - 1 byte: flags (bit 0 = compressed)
//! - N bytes: payload (possibly LZ4 compressed)
//!
//! Upload batches and download chunks are the bulk of the traffic, so
//! payloads larger than 1KB are compressed when that actually saves space.

use crate::error::{ProtocolError, Result};
use crate::messages::Envelope;

/// Magic bytes identifying a FileVault frame.
pub const FRAME_MAGIC: [u8; 4] = *b"FVLT";

/// Compression threshold in bytes. Payloads larger than this are compressed.
pub const COMPRESSION_THRESHOLD: usize = 1024;

/// Maximum frame size (16 MB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Bytes preceding the content: magic + length.
pub const FRAME_PREFIX_SIZE: usize = 8;

/// Frame header size: prefix + flags byte.
pub const FRAME_HEADER_SIZE: usize = FRAME_PREFIX_SIZE + 1;

/// Flags indicating frame properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Flag indicating the payload is LZ4 compressed.
    pub const COMPRESSED: u8 = 0b0000_0001;

    /// Create a new empty flags set.
    #[inline]
    pub fn new() -> Self {
        Self(0)
    }

    /// Create flags from a raw byte value.
    #[inline]
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Get the raw byte value of the flags.
    #[inline]
    pub fn as_byte(self) -> u8 {
        self.0
    }

    /// Check if the compressed flag is set.
    #[inline]
    pub fn is_compressed(self) -> bool {
        self.0 & Self::COMPRESSED != 0
    }

    /// Return a new flags with compressed set or cleared.
    #[inline]
    pub fn with_compressed(self, compressed: bool) -> Self {
        if compressed {
            Self(self.0 | Self::COMPRESSED)
        } else {
            Self(self.0 & !Self::COMPRESSED)
        }
    }
}

/// A frame containing a header and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame flags.
    pub flags: FrameFlags,
    /// The payload data (uncompressed form).
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a new frame with the given payload.
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            flags: FrameFlags::new(),
            payload,
        }
    }
}

/// Validate the 8-byte frame prefix and return the content length that
/// follows it (flags byte plus payload).
///
/// Stream readers call this after reading the prefix to learn how many more
/// bytes belong to the frame.
pub fn parse_prefix(prefix: &[u8]) -> Result<usize> {
    if prefix.len() < FRAME_PREFIX_SIZE {
        return Err(ProtocolError::Deserialization(format!(
            "insufficient data for frame header: need {} bytes, have {}",
            FRAME_PREFIX_SIZE,
            prefix.len()
        )));
    }

    if prefix[0..4] != FRAME_MAGIC {
        return Err(ProtocolError::InvalidFrameMagic {
            expected: u32::from_be_bytes(FRAME_MAGIC),
            got: u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]),
        });
    }

    let content_len =
        u32::from_be_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]) as usize;

    let total_frame_size = FRAME_PREFIX_SIZE + content_len;
    if total_frame_size > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: total_frame_size,
            max: MAX_FRAME_SIZE,
        });
    }

    if content_len < 1 {
        return Err(ProtocolError::Deserialization(
            "invalid frame: content length must be at least 1 for flags byte".to_string(),
        ));
    }

    Ok(content_len)
}

/// Encoder and decoder for frames.
///
/// Payloads above [`COMPRESSION_THRESHOLD`] are LZ4-compressed when that
/// makes them smaller.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new frame codec.
    pub fn new() -> Self {
        Self
    }

    /// Encode a frame into bytes.
    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        let payload = &frame.payload;

        if payload.len() > MAX_FRAME_SIZE - FRAME_HEADER_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len() + FRAME_HEADER_SIZE,
                max: MAX_FRAME_SIZE,
            });
        }

        let compressed = if payload.len() > COMPRESSION_THRESHOLD {
            let compressed = lz4_flex::compress_prepend_size(payload);
            (compressed.len() < payload.len()).then_some(compressed)
        } else {
            None
        };

        let (body, flags) = match &compressed {
            Some(bytes) => (bytes.as_slice(), frame.flags.with_compressed(true)),
            None => (payload.as_slice(), frame.flags.with_compressed(false)),
        };

        let content_len = 1 + body.len();
        let mut output = Vec::with_capacity(FRAME_PREFIX_SIZE + content_len);
        output.extend_from_slice(&FRAME_MAGIC);
        output.extend_from_slice(&(content_len as u32).to_be_bytes());
        output.push(flags.as_byte());
        output.extend_from_slice(body);

        Ok(output)
    }

    /// Decode the content (flags byte plus payload) that follows a prefix.
    pub fn decode_content(&self, content: &[u8]) -> Result<Frame> {
        let (&flag_byte, body) = content.split_first().ok_or_else(|| {
            ProtocolError::Deserialization("frame content is missing the flags byte".to_string())
        })?;
        let flags = FrameFlags::from_byte(flag_byte);

        let payload = if flags.is_compressed() {
            lz4_flex::decompress_size_prepended(body).map_err(|e| {
                ProtocolError::Deserialization(format!("failed to decompress payload: {}", e))
            })?
        } else {
            body.to_vec()
        };

        Ok(Frame {
            // Payload is stored decompressed, so the flag no longer applies.
            flags: flags.with_compressed(false),
            payload,
        })
    }

    /// Decode a frame from bytes.
    ///
    /// Returns the decoded frame and the number of bytes consumed.
    pub fn decode(&self, data: &[u8]) -> Result<(Frame, usize)> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(ProtocolError::Deserialization(format!(
                "insufficient data for frame header: need {} bytes, have {}",
                FRAME_HEADER_SIZE,
                data.len()
            )));
        }

        let content_len = parse_prefix(&data[..FRAME_PREFIX_SIZE])?;
        let end = FRAME_PREFIX_SIZE + content_len;
        if data.len() < end {
            return Err(ProtocolError::Deserialization(format!(
                "insufficient data for frame: need {} bytes, have {}",
                end,
                data.len()
            )));
        }

        let frame = self.decode_content(&data[FRAME_PREFIX_SIZE..end])?;
        Ok((frame, end))
    }

    /// Serialize an envelope and wrap it in a frame.
    pub fn encode_envelope(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        let bytes = envelope.to_msgpack()?;
        self.encode(&Frame::new(bytes))
    }

    /// Unwrap a frame and deserialize the envelope inside it.
    pub fn decode_envelope(&self, frame: &Frame) -> Result<Envelope> {
        let envelope = Envelope::from_msgpack(&frame.payload)?;
        envelope.check_version()?;
        Ok(envelope)
    }
}
