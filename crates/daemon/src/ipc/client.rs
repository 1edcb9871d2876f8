//! Client for talking to a running storage server.
//!
//! Requests are sent one at a time; each carries a fresh sequence number
//! and the reply must echo it.

use std::io;
use std::path::Path;
use std::time::Duration;

use protocol::messages::{Bind, Message, Ping};
use protocol::Envelope;
use tokio::net::UnixStream;

use super::connection::{FramedConnection, IpcError};

/// Default timeout for client operations in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// A client for a storage server.
pub struct StorageClient {
    conn: FramedConnection,
    timeout: Duration,
    next_sequence: u64,
}

impl StorageClient {
    /// Connect to the server at the specified socket path.
    pub async fn connect(path: &Path) -> Result<Self, IpcError> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self::from_stream(
            stream,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        ))
    }

    /// Connect to the server, giving up after `timeout`.
    ///
    /// The same timeout applies to every later request.
    pub async fn connect_with_timeout(path: &Path, timeout: Duration) -> Result<Self, IpcError> {
        let stream = tokio::time::timeout(timeout, UnixStream::connect(path))
            .await
            .map_err(|_| {
                IpcError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "connection timed out",
                ))
            })??;
        Ok(Self::from_stream(stream, timeout))
    }

    fn from_stream(stream: UnixStream, timeout: Duration) -> Self {
        Self {
            conn: FramedConnection::new(stream),
            timeout,
            next_sequence: 1,
        }
    }

    /// Set the timeout for operations.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send a message and wait for the server's reply.
    ///
    /// Error replies are returned as `Message::Error`; use
    /// [`call`](Self::call) to turn them into `Err`.
    pub async fn request(&mut self, message: Message) -> Result<Message, IpcError> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let timeout = self.timeout;
        tokio::time::timeout(timeout, self.exchange(Envelope::new(sequence, message)))
            .await
            .map_err(|_| IpcError::Timeout(timeout.as_millis() as u64))?
    }

    /// Like [`request`](Self::request), but error replies become
    /// [`IpcError::Remote`].
    pub async fn call(&mut self, message: Message) -> Result<Message, IpcError> {
        match self.request(message).await? {
            Message::Error(err) => Err(IpcError::Remote(err)),
            reply => Ok(reply),
        }
    }

    /// Attach an identity to this connection.
    ///
    /// Returns the identity the server confirmed.
    pub async fn bind(&mut self, identity: Option<&str>) -> Result<Option<String>, IpcError> {
        let reply = self
            .call(Message::Bind(Bind {
                identity: identity.map(str::to_string),
            }))
            .await?;
        match reply {
            Message::Bound(bound) => Ok(bound.identity),
            other => Err(unexpected("Bound", &other)),
        }
    }

    /// Check that the server is responsive.
    pub async fn ping(&mut self) -> Result<bool, IpcError> {
        let timestamp = crate::router::current_timestamp_ms();
        match self.call(Message::Ping(Ping { timestamp })).await? {
            Message::Pong(pong) => Ok(pong.timestamp == timestamp),
            other => Err(unexpected("Pong", &other)),
        }
    }

    async fn exchange(&mut self, envelope: Envelope) -> Result<Message, IpcError> {
        let sequence = envelope.sequence;
        self.conn.send_envelope(&envelope).await?;

        let reply = self.conn.read_envelope().await?.ok_or(IpcError::Closed)?;
        // Version errors are sent before the server has read a sequence number.
        if reply.sequence != sequence && !matches!(reply.payload, Message::Error(_)) {
            return Err(IpcError::UnexpectedResponse(format!(
                "sequence {} answered with {}",
                sequence, reply.sequence
            )));
        }
        Ok(reply.payload)
    }
}

/// Build an error for a reply of the wrong type.
fn unexpected(expected: &str, got: &Message) -> IpcError {
    IpcError::UnexpectedResponse(format!("expected {expected}, got {got:?}"))
}
