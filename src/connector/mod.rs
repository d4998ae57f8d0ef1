//! Remote command surface
//!
//! A single TCP listener; one task per accepted connection. Each request
//! cycle is two reads: the owner key (at most [`KEY_BUFFER_SIZE`] bytes),
//! then a JSON command (at most [`COMMAND_BUFFER_SIZE`] bytes). A wrong key
//! closes the connection without a response. Decoded commands are handed
//! to the control loop as [`ControlRequest`]s.

pub mod command;

use std::net::SocketAddr;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

pub use command::{CommandOutcome, CommandPayload, ControlCommand, ControlRequest};

use crate::{Error, Result};

/// Maximum size of the owner key read
pub const KEY_BUFFER_SIZE: usize = 1024;

/// Maximum size of the command read
pub const COMMAND_BUFFER_SIZE: usize = KEY_BUFFER_SIZE * 10;

/// Per-listener settings shared by every connection
#[derive(Debug)]
struct Session {
    owner_key: SecretString,
    acknowledge: bool,
    requests: mpsc::Sender<ControlRequest>,
}

/// Listens for controller connections
#[derive(Debug)]
pub struct Connector {
    listener: TcpListener,
    session: Arc<Session>,
}

impl Connector {
    /// Bind the listener
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound
    pub async fn bind(
        addr: SocketAddr,
        owner_key: SecretString,
        acknowledge: bool,
        requests: mpsc::Sender<ControlRequest>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, acknowledge, "controller listener bound");

        Ok(Self {
            listener,
            session: Arc::new(Session {
                owner_key,
                acknowledge,
                requests,
            }),
        })
    }

    /// Address the listener is bound to
    ///
    /// # Errors
    ///
    /// Returns error if the socket address cannot be read
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` is cancelled
    pub async fn serve(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "controller connected");
                        let session = Arc::clone(&self.session);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &session, shutdown).await {
                                tracing::debug!(%peer, error = %e, "controller connection ended");
                            }
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to accept controller connection"),
                },
            }
        }

        tracing::info!("controller listener stopped");
    }
}

/// Read once, up to `limit` bytes, and decode as text
///
/// Returns `None` when the peer closed the connection.
async fn read_text(stream: &mut TcpStream, limit: usize) -> Result<Option<String>> {
    let mut buf = vec![0u8; limit];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&buf[..n]).into_owned()))
}

fn authenticate(presented: &str, owner_key: &SecretString) -> Result<()> {
    if presented == owner_key.expose_secret() {
        Ok(())
    } else {
        Err(Error::Auth)
    }
}

async fn reply(stream: &mut TcpStream, outcome: &CommandOutcome) -> Result<()> {
    let mut line = serde_json::to_vec(outcome)?;
    line.push(b'\n');
    stream.write_all(&line).await?;
    Ok(())
}

async fn handle_connection(
    mut stream: TcpStream,
    session: &Session,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        let key = tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            key = read_text(&mut stream, KEY_BUFFER_SIZE) => key?,
        };
        let Some(key) = key else {
            return Ok(());
        };

        // Dropping the stream closes the connection without a response
        authenticate(&key, &session.owner_key)?;

        let text = tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            text = read_text(&mut stream, COMMAND_BUFFER_SIZE) => text?,
        };
        let Some(text) = text else {
            return Ok(());
        };

        let command = match ControlCommand::parse(&text) {
            Ok(Some(command)) => command,
            Ok(None) => {
                tracing::debug!(payload = %text, "ignoring unknown command");
                if session.acknowledge {
                    reply(&mut stream, &CommandOutcome::error("unknown command")).await?;
                }
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable command");
                if session.acknowledge {
                    reply(&mut stream, &CommandOutcome::error(e.to_string())).await?;
                }
                continue;
            }
        };

        tracing::debug!(command = command.name(), "received command");

        let (request, reply_rx) = if session.acknowledge {
            let (tx, rx) = oneshot::channel();
            let request = ControlRequest {
                command,
                reply: Some(tx),
            };
            (request, Some(rx))
        } else {
            (ControlRequest::fire_and_forget(command), None)
        };

        if session.requests.send(request).await.is_err() {
            // Control loop is gone
            return Ok(());
        }

        if let Some(rx) = reply_rx
            && let Ok(outcome) = rx.await
        {
            reply(&mut stream, &outcome).await?;
        }
    }
}
