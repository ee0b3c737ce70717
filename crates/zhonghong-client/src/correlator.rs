//! Request/response pairing.
//!
//! The gateway protocol has no sequence numbers, so at most one command is in
//! flight at a time. Callers queue on a FIFO mutex for their turn, register
//! the reply they expect in a single pending slot, write the frame and wait.
//! The dispatcher resolves the slot when a frame with the same command kind
//! and address arrives.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use zhonghong_protocol::{encode, hex_dump, CommandKind, DeviceAddress, Frame, WireProfile};

use crate::diagnostics::Diagnostics;
use crate::error::{GatewayError, GatewayResult};
use crate::session::{LinkState, Session};

type ReplySender = oneshot::Sender<GatewayResult<Frame>>;

/// The command currently awaiting its reply.
#[derive(Debug)]
pub struct PendingCommand {
    id: u64,
    address: Option<DeviceAddress>,
    kind: CommandKind,
    deadline: Instant,
    reply: ReplySender,
}

impl PendingCommand {
    /// A reply matches when both its command kind and its address do.
    pub fn matches(&self, frame: &Frame) -> bool {
        frame.command() == self.kind && frame.address() == self.address
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// Clears the pending slot when the waiting call finishes, however it finishes.
struct SlotGuard<'a> {
    slot: &'a Mutex<Option<PendingCommand>>,
    id: u64,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if slot.as_ref().map(|p| p.id) == Some(self.id) {
            *slot = None;
        }
    }
}

/// Serializes commands and pairs them with their replies.
pub struct Correlator {
    session: Arc<Session>,
    diagnostics: Arc<Diagnostics>,
    profile: WireProfile,
    turn: tokio::sync::Mutex<()>,
    pending: Mutex<Option<PendingCommand>>,
    next_id: AtomicU64,
}

impl Correlator {
    pub fn new(session: Arc<Session>, diagnostics: Arc<Diagnostics>, profile: WireProfile) -> Self {
        Correlator {
            session,
            diagnostics,
            profile,
            turn: tokio::sync::Mutex::new(()),
            pending: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Send a command and wait for the matching reply.
    pub async fn send_command(
        &self,
        address: Option<DeviceAddress>,
        command: CommandKind,
        payload: &[u8],
        timeout: Duration,
    ) -> GatewayResult<Frame> {
        self.send_command_cancellable(address, command, payload, timeout, &CancellationToken::new())
            .await
    }

    /// Like [`send_command`](Self::send_command), but gives up with
    /// [`GatewayError::Cancelled`] as soon as `cancel` fires, whether the call
    /// is still queued or already waiting for its reply.
    pub async fn send_command_cancellable(
        &self,
        address: Option<DeviceAddress>,
        command: CommandKind,
        payload: &[u8],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> GatewayResult<Frame> {
        let wire = encode(command, address, payload, &self.profile)?;

        let _turn = tokio::select! {
            turn = self.turn.lock() => turn,
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
        };

        match self.session.state() {
            LinkState::Connected => {}
            LinkState::Closed => return Err(GatewayError::Closed),
            _ => {
                self.diagnostics.record_connection_lost();
                return Err(GatewayError::ConnectionLost);
            }
        }

        let deadline = Instant::now() + timeout;
        let (id, reply) = self.register(address, command, deadline);
        let _slot = SlotGuard {
            slot: &self.pending,
            id,
        };

        trace!(id, frame = %hex_dump(&wire), "send");
        // A gateway that stops reading fills the socket buffer; the write
        // shares the command's deadline and cancellation.
        let written = tokio::select! {
            biased;
            written = self.session.write(&wire) => written,
            _ = tokio::time::sleep_until(deadline) => {
                self.abandon_write(id).await;
                self.diagnostics.record_timeout(command);
                return Err(GatewayError::Timeout(timeout));
            }
            _ = cancel.cancelled() => {
                self.abandon_write(id).await;
                return Err(GatewayError::Cancelled);
            }
        };
        if let Err(e) = written {
            if matches!(e, GatewayError::ConnectionLost) {
                self.diagnostics.record_connection_lost();
            }
            return Err(e);
        }
        self.diagnostics.record_command_sent(command);
        let sent_at = Instant::now();

        tokio::select! {
            result = reply => match result {
                Ok(Ok(frame)) => {
                    self.diagnostics.record_latency(command, sent_at.elapsed());
                    Ok(frame)
                }
                Ok(Err(e)) => {
                    if matches!(e, GatewayError::ConnectionLost) {
                        self.diagnostics.record_connection_lost();
                    }
                    Err(e)
                }
                // Sender dropped without an answer: the slot was torn down.
                Err(_) => {
                    self.diagnostics.record_connection_lost();
                    Err(GatewayError::ConnectionLost)
                }
            },
            _ = tokio::time::sleep_until(deadline) => {
                debug!(id, %command, address = ?address, "command timed out");
                self.diagnostics.record_timeout(command);
                Err(GatewayError::Timeout(timeout))
            }
            _ = cancel.cancelled() => {
                debug!(id, %command, "command cancelled");
                Err(GatewayError::Cancelled)
            }
        }
    }

    /// A write cut off midway may leave part of a frame on the stream, so the
    /// link is dropped and the dispatcher reconnects.
    async fn abandon_write(&self, id: u64) {
        warn!(id, "write to gateway did not complete, dropping the link");
        self.session.disconnect().await;
    }

    fn register(
        &self,
        address: Option<DeviceAddress>,
        kind: CommandKind,
        deadline: Instant,
    ) -> (u64, oneshot::Receiver<GatewayResult<Frame>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, receiver) = oneshot::channel();
        *self.pending.lock() = Some(PendingCommand {
            id,
            address,
            kind,
            deadline,
            reply,
        });
        (id, receiver)
    }

    #[cfg(test)]
    pub(crate) fn register_for_test(
        &self,
        address: Option<DeviceAddress>,
        kind: CommandKind,
        deadline: Instant,
    ) -> (u64, oneshot::Receiver<GatewayResult<Frame>>) {
        self.register(address, kind, deadline)
    }

    /// Hand `frame` to the pending command if it is the awaited reply.
    ///
    /// Returns the frame back when nothing was waiting for it.
    pub fn try_resolve(&self, frame: Frame) -> Option<Frame> {
        let pending = {
            let mut slot = self.pending.lock();
            match slot.take() {
                Some(pending) if pending.matches(&frame) => pending,
                other => {
                    *slot = other;
                    return Some(frame);
                }
            }
        };

        trace!(id = pending.id, "reply matched");
        if pending.reply.send(Ok(frame)).is_err() {
            debug!(id = pending.id, "reply arrived after the caller gave up");
        }
        None
    }

    /// Fail the pending command, if any, with `error`.
    pub fn fail_pending(&self, error: GatewayError) -> bool {
        let Some(pending) = self.pending.lock().take() else {
            return false;
        };
        debug!(id = pending.id, error = %error, "failing pending command");
        let _ = pending.reply.send(Err(error));
        true
    }

    /// Whether a command is currently awaiting its reply.
    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use bytes::Bytes;
    use zhonghong_protocol::FrameBody;

    const ADDR: DeviceAddress = DeviceAddress::new(1, 1, 3);

    fn correlator() -> Correlator {
        let config = Arc::new(GatewayConfig::new("127.0.0.1", 1));
        let diagnostics = Arc::new(Diagnostics::default());
        let session = Arc::new(Session::new(config, diagnostics.clone()));
        Correlator::new(session, diagnostics, WireProfile::default())
    }

    fn reply(command: CommandKind, address: Option<DeviceAddress>) -> Frame {
        Frame::from_body(FrameBody {
            command,
            address,
            payload: Bytes::from_static(&[1]),
            raw: Bytes::new(),
        })
    }

    #[tokio::test]
    async fn test_resolve_requires_kind_and_address() {
        let correlator = correlator();
        let deadline = Instant::now() + Duration::from_secs(1);
        let (_, receiver) = correlator.register(Some(ADDR), CommandKind::Power, deadline);

        let other_unit = reply(CommandKind::Power, Some(DeviceAddress::new(1, 1, 4)));
        assert!(correlator.try_resolve(other_unit).is_some());
        let other_kind = reply(CommandKind::Mode, Some(ADDR));
        assert!(correlator.try_resolve(other_kind).is_some());
        assert!(correlator.has_pending());

        let matching = reply(CommandKind::Power, Some(ADDR));
        assert!(correlator.try_resolve(matching.clone()).is_none());
        assert!(!correlator.has_pending());
        assert_eq!(receiver.await.unwrap().unwrap(), matching);
    }

    #[tokio::test]
    async fn test_fail_pending() {
        let correlator = correlator();
        assert!(!correlator.fail_pending(GatewayError::ConnectionLost));

        let deadline = Instant::now() + Duration::from_secs(1);
        let (_, receiver) = correlator.register(None, CommandKind::Status, deadline);
        assert!(correlator.fail_pending(GatewayError::ConnectionLost));
        assert!(matches!(receiver.await.unwrap(), Err(GatewayError::ConnectionLost)));
    }

    #[tokio::test]
    async fn test_slot_guard_only_clears_its_own_command() {
        let correlator = correlator();
        let deadline = Instant::now() + Duration::from_secs(1);
        let (first, _rx1) = correlator.register(Some(ADDR), CommandKind::Power, deadline);
        let (_second, _rx2) = correlator.register(Some(ADDR), CommandKind::Mode, deadline);

        drop(SlotGuard {
            slot: &correlator.pending,
            id: first,
        });
        assert!(correlator.has_pending());
    }

    #[tokio::test]
    async fn test_send_while_disconnected() {
        let correlator = correlator();
        let result = correlator
            .send_command(Some(ADDR), CommandKind::Power, &[1], Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(GatewayError::ConnectionLost)));
        assert!(!correlator.has_pending());
    }

    /// Correlator connected to a peer that accepts but never reads, with the
    /// socket send buffer already full.
    async fn stalled_correlator() -> (Correlator, tokio::net::TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = Arc::new(GatewayConfig::new("127.0.0.1", port));
        let diagnostics = Arc::new(Diagnostics::default());
        let session = Arc::new(Session::new(config, diagnostics.clone()));

        let _reader = session.connect().await.unwrap();
        let (peer, _) = listener.accept().await.unwrap();

        let chunk = vec![0u8; 64 * 1024];
        let mut filled = false;
        for _ in 0..4096 {
            if tokio::time::timeout(Duration::from_millis(50), session.write(&chunk))
                .await
                .is_err()
            {
                filled = true;
                break;
            }
        }
        assert!(filled, "socket send buffer never filled");

        (Correlator::new(session, diagnostics, WireProfile::default()), peer)
    }

    #[tokio::test]
    async fn test_blocked_write_honours_deadline() {
        let (correlator, _peer) = stalled_correlator().await;

        let started = std::time::Instant::now();
        let result = correlator
            .send_command(Some(ADDR), CommandKind::Power, &[1], Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(GatewayError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(2));

        assert!(!correlator.has_pending());
        assert_eq!(correlator.session.state(), LinkState::Disconnected);
        assert_eq!(correlator.diagnostics.snapshot().timeouts, 1);
    }

    #[tokio::test]
    async fn test_blocked_write_honours_cancel() {
        let (correlator, _peer) = stalled_correlator().await;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let result = correlator
            .send_command_cancellable(Some(ADDR), CommandKind::Power, &[1], Duration::from_secs(30), &cancel)
            .await;
        assert!(matches!(result, Err(GatewayError::Cancelled)));
        assert_eq!(correlator.session.state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_cancel_before_turn() {
        let correlator = correlator();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let _held = correlator.turn.lock().await;
        let result = correlator
            .send_command_cancellable(None, CommandKind::Status, &[], Duration::from_secs(1), &cancel)
            .await;
        assert!(matches!(result, Err(GatewayError::Cancelled)));
    }
}
