//! The public gateway client.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use zhonghong_metrics::GatewayLabels;
use zhonghong_protocol::{Command, CommandKind, DeviceAddress, FanSpeed, Frame, Mode};

use crate::config::GatewayConfig;
use crate::correlator::Correlator;
use crate::diagnostics::{Diagnostics, DiagnosticsSnapshot};
use crate::dispatcher::Dispatcher;
use crate::error::{GatewayError, GatewayResult};
use crate::registry::{DeviceRegistry, DeviceState, SubscriptionId};
use crate::session::{LinkState, Session};

/// Connected client for one ZhongHong gateway.
///
/// Commands are serialized: concurrent calls queue and are sent in the order
/// they were issued, one at a time. Unsolicited status frames keep the
/// [`DeviceRegistry`] current in the background.
///
/// ```no_run
/// use zhonghong_client::{Gateway, GatewayConfig};
/// use zhonghong_protocol::{DeviceAddress, Mode};
///
/// # async fn demo() -> Result<(), zhonghong_client::GatewayError> {
/// let gateway = Gateway::connect(GatewayConfig::new("192.168.1.50", 9999)).await?;
/// gateway.query_all().await?;
///
/// let unit = DeviceAddress::new(1, 1, 3);
/// gateway.set_mode(unit, Mode::Cool).await?;
/// gateway.set_temperature(unit, 22.5).await?;
///
/// gateway.subscribe(|state| println!("{} is now {:.1}°C", state.address, state.current_temp));
/// gateway.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Gateway {
    config: Arc<GatewayConfig>,
    session: Arc<Session>,
    correlator: Arc<Correlator>,
    registry: Arc<DeviceRegistry>,
    diagnostics: Arc<Diagnostics>,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<GatewayResult<()>>>>,
}

impl Gateway {
    /// Validate `config`, open the link and start the reader task.
    pub async fn connect(config: GatewayConfig) -> GatewayResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let profile = config.profile;
        let diagnostics = Arc::new(Diagnostics::new(GatewayLabels::new(config.endpoint())));

        let session = Arc::new(Session::new(config.clone(), diagnostics.clone()));
        let correlator = Arc::new(Correlator::new(session.clone(), diagnostics.clone(), profile));
        let registry = Arc::new(DeviceRegistry::new(profile, diagnostics.clone()));
        let shutdown = CancellationToken::new();

        let reader = session.connect().await?;
        let handle = Dispatcher::new(
            session.clone(),
            correlator.clone(),
            registry.clone(),
            diagnostics.clone(),
            profile,
            config.read_buffer_size,
            shutdown.clone(),
        )
        .spawn(reader);

        Ok(Gateway {
            config,
            session,
            correlator,
            registry,
            diagnostics,
            shutdown,
            dispatcher: Mutex::new(Some(handle)),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Send a raw command and wait up to `timeout` for the matching reply.
    pub async fn send_command(
        &self,
        address: Option<DeviceAddress>,
        command: CommandKind,
        payload: &[u8],
        timeout: Duration,
    ) -> GatewayResult<Frame> {
        self.correlator
            .send_command(address, command, payload, timeout)
            .await
    }

    /// [`send_command`](Self::send_command) that stops early when `cancel` fires.
    pub async fn send_command_cancellable(
        &self,
        address: Option<DeviceAddress>,
        command: CommandKind,
        payload: &[u8],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> GatewayResult<Frame> {
        self.correlator
            .send_command_cancellable(address, command, payload, timeout, cancel)
            .await
    }

    /// Send a typed command to one unit using the configured timeout.
    #[instrument(level = "debug", skip_all, fields(address = %address, command = %command))]
    pub async fn execute(&self, address: DeviceAddress, command: Command) -> GatewayResult<Frame> {
        let payload = command.payload(&self.config.profile)?;
        self.correlator
            .send_command(Some(address), command.kind(), &payload, self.config.command_timeout())
            .await
    }

    pub async fn set_power(&self, address: DeviceAddress, on: bool) -> GatewayResult<Frame> {
        self.execute(address, Command::SetPower(on)).await
    }

    pub async fn set_mode(&self, address: DeviceAddress, mode: Mode) -> GatewayResult<Frame> {
        self.execute(address, Command::SetMode(mode)).await
    }

    pub async fn set_fan_speed(&self, address: DeviceAddress, speed: FanSpeed) -> GatewayResult<Frame> {
        self.execute(address, Command::SetFanSpeed(speed)).await
    }

    /// Set the target temperature in degrees Celsius.
    pub async fn set_temperature(&self, address: DeviceAddress, celsius: f32) -> GatewayResult<Frame> {
        self.execute(address, Command::SetTemperature(celsius)).await
    }

    /// Ask one unit for its status.
    ///
    /// The reply is returned and also applied to the registry.
    pub async fn query(&self, address: DeviceAddress) -> GatewayResult<Frame> {
        let frame = self.execute(address, Command::Query).await?;
        self.apply_reply(&frame)?;
        Ok(frame)
    }

    /// Ask the gateway for every unit it knows; returns how many units the
    /// registry holds afterwards.
    pub async fn query_all(&self) -> GatewayResult<usize> {
        let frame = self
            .correlator
            .send_command(None, CommandKind::Status, &[], self.config.command_timeout())
            .await?;
        self.apply_reply(&frame)?;
        let count = self.registry.len();
        info!(units = count, "gateway reported its units");
        Ok(count)
    }

    fn apply_reply(&self, frame: &Frame) -> GatewayResult<()> {
        if let Err(e) = self.registry.update(frame) {
            warn!(error = %e, frame = %frame.to_hex(), "unusable status reply");
            self.diagnostics.record_parse_error();
            return Err(e.into());
        }
        Ok(())
    }

    /// Register a state-change observer.
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&DeviceState) + Send + Sync + 'static,
    {
        self.registry.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry.unsubscribe(id)
    }

    /// Snapshot of all known units, sorted by address.
    pub fn list(&self) -> Vec<DeviceState> {
        self.registry.list()
    }

    pub fn get(&self, address: DeviceAddress) -> GatewayResult<DeviceState> {
        self.registry.get(address)
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    pub fn link_state(&self) -> LinkState {
        self.session.state()
    }

    pub fn subscribe_link_state(&self) -> watch::Receiver<LinkState> {
        self.session.subscribe_state()
    }

    /// Wait until the link reaches `target` or `timeout` elapses.
    pub async fn wait_for_link(&self, target: LinkState, timeout: Duration) -> bool {
        let mut state = self.session.subscribe_state();
        tokio::time::timeout(timeout, state.wait_for(|current| *current == target))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false)
    }

    /// Resolves once the link is closed or has permanently failed.
    pub async fn closed(&self) {
        let mut state = self.session.subscribe_state();
        let _ = state.wait_for(|current| current.is_terminal()).await;
    }

    /// Stop the reader task and drop the socket.
    ///
    /// Commands issued afterwards fail with [`GatewayError::Closed`].
    pub async fn close(&self) -> GatewayResult<()> {
        self.shutdown.cancel();
        self.session.close().await;
        self.correlator.fail_pending(GatewayError::Closed);

        let handle = self.dispatcher.lock().take();
        let Some(handle) = handle else {
            return Ok(());
        };
        match handle.await {
            Ok(Ok(())) | Ok(Err(GatewayError::Closed)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(e) => {
                warn!(error = %e, "dispatcher task ended abnormally");
                Ok(())
            }
        }
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
