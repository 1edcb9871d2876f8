//! Storage server accepting framed requests over a Unix Domain Socket.
//!
//! Each accepted connection runs on its own task. A connection starts
//! unbound; a successful `Bind` attaches an identity that every later
//! request on that connection operates on.

use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use protocol::messages::{ErrorCode, ErrorMessage, Message};
use protocol::{Envelope, ProtocolError};
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::{FramedConnection, IpcError};
use crate::files::Identity;
use crate::router::{is_mutation, MessageRouter};

/// A server that listens for storage requests on a Unix Domain Socket.
pub struct StorageServer {
    listener: UnixListener,
    path: PathBuf,
    request_timeout: Duration,
}

impl StorageServer {
    /// Bind the server to the specified socket path.
    ///
    /// Missing parent directories are created with mode 0700. A socket file
    /// left behind by a dead server is removed; a socket with a live
    /// listener fails with `AddrInUse`.
    pub async fn bind(path: &Path) -> Result<Self, io::Error> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::DirBuilder::new()
                    .recursive(true)
                    .mode(0o700)
                    .create(parent)?;
            }
        }

        if path.exists() {
            if std::os::unix::net::UnixStream::connect(path).is_ok() {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("a server is already listening on {}", path.display()),
                ));
            }
            debug!(path = %path.display(), "Removing stale socket");
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;

        Ok(Self {
            listener,
            path: path.to_path_buf(),
            request_timeout: Duration::from_secs(30),
        })
    }

    /// Set how long a read-only request may run before the client is told
    /// it timed out.
    ///
    /// Requests that change stored data always run to completion and report
    /// their real outcome.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Socket path the server is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept a new incoming connection.
    pub async fn accept(&self) -> Result<FramedConnection, io::Error> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(FramedConnection::new(stream))
    }

    /// Serve connections until `shutdown` is cancelled.
    ///
    /// The socket file is removed when the loop exits.
    pub async fn serve(
        self,
        router: Arc<MessageRouter>,
        shutdown: CancellationToken,
    ) -> Result<(), io::Error> {
        info!(path = %self.path.display(), "Storage server listening");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Storage server shutting down");
                    break;
                }
                accepted = self.accept() => {
                    match accepted {
                        Ok(conn) => {
                            let router = Arc::clone(&router);
                            let token = shutdown.child_token();
                            let timeout = self.request_timeout;
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(conn, router, token, timeout).await {
                                    warn!(error = %e, "Connection ended with error");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "Failed to accept connection"),
                    }
                }
            }
        }

        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove socket");
            }
        }
        Ok(())
    }
}

/// Handle one connection until the peer disconnects or shutdown is requested.
async fn handle_connection(
    mut conn: FramedConnection,
    router: Arc<MessageRouter>,
    shutdown: CancellationToken,
    request_timeout: Duration,
) -> Result<(), IpcError> {
    let mut identity: Option<Identity> = None;
    debug!("Connection accepted");

    loop {
        let read = tokio::select! {
            _ = shutdown.cancelled() => break,
            read = conn.read_envelope() => read,
        };

        let envelope = match read {
            Ok(Some(envelope)) => envelope,
            Ok(None) => break,
            Err(IpcError::Protocol(ProtocolError::VersionMismatch { expected, got })) => {
                let reply = Envelope::new(
                    0,
                    Message::Error(ErrorMessage {
                        code: ErrorCode::VersionMismatch,
                        message: format!("server speaks version {expected}, got {got}"),
                        context: None,
                        recoverable: false,
                    }),
                );
                conn.send_envelope(&reply).await?;
                break;
            }
            Err(e) => return Err(e),
        };

        let sequence = envelope.sequence;
        let mutation = is_mutation(&envelope.payload);
        let route = router.route(envelope.payload, identity.as_ref());
        let routed = if mutation {
            Ok(route.await)
        } else {
            tokio::time::timeout(request_timeout, route).await
        };

        let response = match routed {
            Ok(Ok(Some(message))) => {
                if let Message::Bound(bound) = &message {
                    identity = bind_identity(bound.identity.as_deref());
                }
                message
            }
            Ok(Ok(None)) => continue,
            Ok(Err(e)) => Message::Error(e.to_error_message(None)),
            Err(_) => {
                warn!(sequence, "Request timed out");
                Message::Error(ErrorMessage {
                    code: ErrorCode::Timeout,
                    message: format!("request exceeded {} ms", request_timeout.as_millis()),
                    context: None,
                    recoverable: true,
                })
            }
        };

        conn.send_envelope(&Envelope::new(sequence, response)).await?;
    }

    debug!(?identity, "Connection closed");
    Ok(())
}

fn bind_identity(name: Option<&str>) -> Option<Identity> {
    let name = name?;
    match Identity::new(name) {
        Ok(identity) => Some(identity),
        Err(e) => {
            warn!(identity = name, error = %e, "Bound identity failed validation");
            None
        }
    }
}
