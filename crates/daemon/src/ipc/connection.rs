//! Framed envelope transport over a Unix stream.

use std::io;

use protocol::{parse_prefix, Envelope, FrameCodec, ProtocolError, FRAME_PREFIX_SIZE};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::UnixStream;

/// Errors that can occur during IPC communication.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A frame or envelope could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The peer did not answer in time.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// The peer closed the connection before answering.
    #[error("connection closed by peer")]
    Closed,

    /// The peer answered with something other than the expected reply.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The server rejected the request.
    #[error("{}", .0.message)]
    Remote(protocol::messages::ErrorMessage),
}

/// A connection carrying length-prefixed envelopes in both directions.
pub struct FramedConnection {
    reader: BufReader<ReadHalf<UnixStream>>,
    writer: WriteHalf<UnixStream>,
    codec: FrameCodec,
}

impl FramedConnection {
    /// Wrap a connected Unix stream.
    pub fn new(stream: UnixStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            codec: FrameCodec::new(),
        }
    }

    /// Read the next envelope from the peer.
    ///
    /// Returns `None` if the peer has disconnected.
    pub async fn read_envelope(&mut self) -> Result<Option<Envelope>, IpcError> {
        let mut prefix = [0u8; FRAME_PREFIX_SIZE];
        match self.reader.read_exact(&mut prefix).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(IpcError::Io(e)),
        }

        let content_len = parse_prefix(&prefix)?;
        let mut content = vec![0u8; content_len];
        self.reader.read_exact(&mut content).await?;

        let frame = self.codec.decode_content(&content)?;
        let envelope = self.codec.decode_envelope(&frame)?;
        Ok(Some(envelope))
    }

    /// Send an envelope to the peer.
    pub async fn send_envelope(&mut self, envelope: &Envelope) -> Result<(), IpcError> {
        let bytes = self.codec.encode_envelope(envelope)?;
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
