//! TCP link to the gateway.
//!
//! The session owns the write half of the socket and publishes the link
//! state on a watch channel. The read half is handed to the dispatcher, the
//! only task that reads from the gateway.

use std::sync::Arc;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{GatewayConfig, KeepaliveConfig};
use crate::diagnostics::Diagnostics;
use crate::error::{GatewayError, GatewayResult};

/// State of the link to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// A connection attempt is in progress.
    Connecting,
    /// The socket is open.
    Connected,
    /// The link dropped; the dispatcher will reconnect.
    Disconnected,
    /// Reconnect attempts are exhausted.
    Failed,
    /// The owner closed the client.
    Closed,
}

impl LinkState {
    /// No further transitions happen from this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LinkState::Failed | LinkState::Closed)
    }
}

/// Connection to one gateway.
pub struct Session {
    config: Arc<GatewayConfig>,
    diagnostics: Arc<Diagnostics>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    state: watch::Sender<LinkState>,
}

impl Session {
    pub fn new(config: Arc<GatewayConfig>, diagnostics: Arc<Diagnostics>) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Session {
            config,
            diagnostics,
            writer: Mutex::new(None),
            state,
        }
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Receiver that observes every link state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Publish a new state. Terminal states are never left.
    fn set_state(&self, next: LinkState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next || current.is_terminal() {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            debug!(endpoint = %self.config.endpoint(), state = ?next, "link state changed");
            self.diagnostics.record_link_connected(next == LinkState::Connected);
        }
    }

    /// Open the socket and return its read half.
    pub async fn connect(&self) -> GatewayResult<OwnedReadHalf> {
        if self.state().is_terminal() {
            return Err(GatewayError::Closed);
        }
        self.set_state(LinkState::Connecting);

        let endpoint = self.config.endpoint();
        let stream = match tokio::time::timeout(
            self.config.connect_timeout(),
            TcpStream::connect(&endpoint),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                self.set_state(LinkState::Disconnected);
                return Err(GatewayError::Connect { endpoint, source });
            }
            Err(_) => {
                self.set_state(LinkState::Disconnected);
                return Err(GatewayError::Connect {
                    endpoint,
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "connect timed out",
                    ),
                });
            }
        };
        stream.set_nodelay(true)?;
        if self.config.keepalive.enabled {
            set_keepalive(&stream, &self.config.keepalive)?;
        }

        let (reader, writer) = stream.into_split();
        *self.writer.lock().await = Some(writer);
        self.set_state(LinkState::Connected);
        info!(%endpoint, "connected to gateway");
        Ok(reader)
    }

    /// Reconnect with exponential backoff.
    ///
    /// Returns [`GatewayError::Closed`] if `shutdown` fires while waiting and
    /// [`GatewayError::ConnectionLost`] once `max_retries` attempts have failed.
    pub async fn reconnect(&self, shutdown: &CancellationToken) -> GatewayResult<OwnedReadHalf> {
        let backoff = &self.config.backoff;
        let mut attempt: u32 = 0;

        loop {
            if let Some(max) = backoff.max_retries {
                if attempt >= max {
                    warn!(attempts = attempt, "giving up reconnecting to gateway");
                    self.set_state(LinkState::Failed);
                    return Err(GatewayError::ConnectionLost);
                }
            }

            let delay: Duration = backoff.delay_for(attempt);
            attempt += 1;
            debug!(attempt, delay_ms = delay.as_millis() as u64, "waiting before reconnect");

            tokio::select! {
                _ = shutdown.cancelled() => return Err(GatewayError::Closed),
                _ = tokio::time::sleep(delay) => {}
            }

            match self.connect().await {
                Ok(reader) => {
                    self.diagnostics.record_reconnect();
                    return Ok(reader);
                }
                Err(GatewayError::Closed) => return Err(GatewayError::Closed),
                Err(e) => warn!(attempt, error = %e, "reconnect failed"),
            }
        }
    }

    /// Write one encoded frame.
    ///
    /// A write failure drops the socket and marks the link disconnected so the
    /// dispatcher notices and reconnects.
    pub async fn write(&self, bytes: &[u8]) -> GatewayResult<()> {
        let mut writer = self.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err(match self.state() {
                LinkState::Closed => GatewayError::Closed,
                _ => GatewayError::ConnectionLost,
            });
        };

        let result = async {
            stream.write_all(bytes).await?;
            stream.flush().await
        }
        .await;

        if let Err(e) = result {
            warn!(error = %e, "write to gateway failed");
            *writer = None;
            drop(writer);
            self.set_state(LinkState::Disconnected);
            return Err(GatewayError::ConnectionLost);
        }
        Ok(())
    }

    /// Drop the socket after a read failure.
    pub async fn disconnect(&self) {
        self.writer.lock().await.take();
        self.set_state(LinkState::Disconnected);
    }

    /// Drop the socket for good.
    pub async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.set_state(LinkState::Closed);
    }
}

fn set_keepalive(stream: &TcpStream, config: &KeepaliveConfig) -> std::io::Result<()> {
    let keepalive = TcpKeepalive::new().with_time(config.idle());
    #[cfg(any(target_os = "linux", target_os = "macos", windows))]
    let keepalive = keepalive.with_interval(config.interval());
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    let keepalive = keepalive.with_retries(config.retries);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}
