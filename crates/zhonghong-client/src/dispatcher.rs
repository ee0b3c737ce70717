//! Reader task.
//!
//! The dispatcher is the only reader of the gateway socket. It decodes
//! frames, hands the awaited reply to the correlator and everything else to
//! the registry. When the link drops it fails the pending command, discards
//! partial input and reconnects.

use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use zhonghong_protocol::{Decoded, Frame, FrameCodec, WireProfile};

use crate::correlator::Correlator;
use crate::diagnostics::Diagnostics;
use crate::error::{GatewayError, GatewayResult};
use crate::registry::DeviceRegistry;
use crate::session::{LinkState, Session};

/// Why the read loop for one connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkEnd {
    Lost,
    Shutdown,
}

pub struct Dispatcher {
    session: Arc<Session>,
    correlator: Arc<Correlator>,
    registry: Arc<DeviceRegistry>,
    diagnostics: Arc<Diagnostics>,
    profile: WireProfile,
    read_buffer_size: usize,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        session: Arc<Session>,
        correlator: Arc<Correlator>,
        registry: Arc<DeviceRegistry>,
        diagnostics: Arc<Diagnostics>,
        profile: WireProfile,
        read_buffer_size: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Dispatcher {
            session,
            correlator,
            registry,
            diagnostics,
            profile,
            read_buffer_size,
            shutdown,
        }
    }

    pub fn spawn(self, reader: OwnedReadHalf) -> JoinHandle<GatewayResult<()>> {
        tokio::spawn(self.run(reader))
    }

    /// Read and route frames until shutdown or until reconnecting fails.
    pub async fn run(self, mut reader: OwnedReadHalf) -> GatewayResult<()> {
        let mut codec = FrameCodec::new(self.profile);
        let mut buf = vec![0u8; self.read_buffer_size];
        let mut state = self.session.subscribe_state();

        loop {
            let end = self.pump(&mut reader, &mut codec, &mut buf, &mut state).await;

            self.correlator.fail_pending(GatewayError::ConnectionLost);
            if codec.buffered_len() > 0 {
                debug!(bytes = codec.buffered_len(), "discarding partial input");
            }
            codec.clear();

            if end == LinkEnd::Shutdown {
                self.session.close().await;
                info!("dispatcher stopped");
                return Ok(());
            }

            self.session.disconnect().await;
            reader = match self.session.reconnect(&self.shutdown).await {
                Ok(reader) => reader,
                Err(GatewayError::Closed) => {
                    self.session.close().await;
                    return Ok(());
                }
                Err(e) => {
                    error!(error = %e, "gateway link failed");
                    return Err(e);
                }
            };
        }
    }

    async fn pump(
        &self,
        reader: &mut OwnedReadHalf,
        codec: &mut FrameCodec,
        buf: &mut [u8],
        state: &mut watch::Receiver<LinkState>,
    ) -> LinkEnd {
        let current = *state.borrow_and_update();
        match current {
            LinkState::Connected => {}
            LinkState::Closed => return LinkEnd::Shutdown,
            _ => return LinkEnd::Lost,
        }

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return LinkEnd::Shutdown,
                changed = state.changed() => {
                    if changed.is_err() {
                        return LinkEnd::Shutdown;
                    }
                    let current = *state.borrow_and_update();
                    match current {
                        LinkState::Connected => {}
                        LinkState::Closed => return LinkEnd::Shutdown,
                        _ => return LinkEnd::Lost,
                    }
                }
                read = reader.read(buf) => match read {
                    Ok(0) => {
                        info!("gateway closed the connection");
                        return LinkEnd::Lost;
                    }
                    Ok(n) => {
                        codec.push(&buf[..n]);
                        self.drain(codec);
                    }
                    Err(e) => {
                        warn!(error = %e, "read from gateway failed");
                        return LinkEnd::Lost;
                    }
                }
            }
        }
    }

    fn drain(&self, codec: &mut FrameCodec) {
        while let Some(decoded) = codec.next() {
            match decoded {
                Decoded::Frame(frame) => self.route(frame),
                Decoded::ChecksumError(e) => {
                    debug!(error = %e, "skipping malformed frame");
                    self.diagnostics.record_checksum_error();
                }
                Decoded::NeedMoreData => break,
            }
        }
    }

    /// The pending command gets first pick; the registry gets the rest.
    pub(crate) fn route(&self, frame: Frame) {
        trace!(frame = %frame.to_hex(), "recv");
        self.diagnostics.record_frame_decoded(frame.command());

        let Some(frame) = self.correlator.try_resolve(frame) else {
            return;
        };

        match &frame {
            Frame::StatusPush(_) | Frame::CommandReply(_) => match self.registry.update(&frame) {
                Ok(changed) => trace!(changed, "unsolicited frame applied"),
                Err(e) => {
                    warn!(error = %e, frame = %frame.to_hex(), "unusable device update");
                    self.diagnostics.record_parse_error();
                }
            },
            Frame::Unknown(body) => {
                debug!(command = %body.command, "dropping frame nobody handles");
                self.diagnostics.record_dropped(body.command);
            }
        }
    }
}
