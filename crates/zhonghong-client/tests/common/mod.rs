//! Scriptable stand-in for a ZhongHong gateway on a loopback socket.

#![allow(dead_code)]

use std::io::ErrorKind;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use zhonghong_client::GatewayConfig;
use zhonghong_protocol::{
    encode, CommandKind, Decoded, DeviceAddress, FanSpeed, Frame, FrameCodec, Mode, StatusReport,
    WireProfile,
};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

pub struct MockGateway {
    listener: TcpListener,
    port: u16,
}

impl MockGateway {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind loopback listener");
        let port = listener.local_addr().expect("local addr").port();
        MockGateway { listener, port }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Client configuration with short timeouts and fast reconnects.
    pub fn config(&self) -> GatewayConfig {
        let mut config = GatewayConfig::new("127.0.0.1", self.port);
        config.connect_timeout_ms = 1_000;
        config.command_timeout_ms = 2_000;
        config.backoff.min_delay_ms = 20;
        config.backoff.max_delay_ms = 100;
        config
    }

    pub async fn accept(&self) -> MockLink {
        let (stream, _) = tokio::time::timeout(WAIT, self.listener.accept())
            .await
            .expect("client did not connect in time")
            .expect("accept connection");
        MockLink {
            stream,
            codec: FrameCodec::new(WireProfile::default()),
        }
    }
}

/// The gateway side of one client connection.
pub struct MockLink {
    stream: TcpStream,
    codec: FrameCodec,
}

impl MockLink {
    /// Next well-formed frame the client sent.
    pub async fn recv_frame(&mut self) -> Frame {
        let mut buf = [0u8; 256];
        loop {
            while let Some(decoded) = self.codec.next() {
                match decoded {
                    Decoded::Frame(frame) => return frame,
                    other => panic!("client sent a malformed frame: {:?}", other),
                }
            }
            let n = tokio::time::timeout(WAIT, self.stream.read(&mut buf))
                .await
                .expect("no frame from client in time")
                .expect("read from client");
            assert!(n > 0, "client closed the connection");
            self.codec.push(&buf[..n]);
        }
    }

    /// Whether the client has sent anything not yet consumed by `recv_frame`.
    pub fn has_unread_bytes(&mut self) -> bool {
        if self.codec.buffered_len() > 0 {
            return true;
        }
        let mut buf = [0u8; 256];
        match self.stream.try_read(&mut buf) {
            Ok(0) => false,
            Ok(n) => {
                self.codec.push(&buf[..n]);
                true
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => false,
            Err(e) => panic!("peek at client input failed: {}", e),
        }
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("write to client");
    }

    pub async fn send_frame(
        &mut self,
        command: CommandKind,
        address: Option<DeviceAddress>,
        payload: &[u8],
    ) {
        let wire = encode(command, address, payload, &WireProfile::default()).expect("encode frame");
        self.send_raw(&wire).await;
    }

    /// Acknowledge a control command the way the gateway does, by echoing it.
    pub async fn echo(&mut self, frame: &Frame) {
        let raw = frame.raw().to_vec();
        self.send_raw(&raw).await;
    }

    pub async fn send_status(&mut self, report: StatusReport) {
        let payload = report.to_payload(&WireProfile::default()).expect("status payload");
        self.send_frame(CommandKind::Status, Some(report.address), &payload)
            .await;
    }

    pub async fn send_status_records(&mut self, reports: &[StatusReport]) {
        let payload =
            StatusReport::to_records(reports, &WireProfile::default()).expect("status records");
        self.send_frame(CommandKind::Status, None, &payload).await;
    }
}

pub fn report(address: DeviceAddress, set_point: f32, current_temp: f32) -> StatusReport {
    StatusReport {
        address,
        power: true,
        mode: Mode::Cool,
        fan_speed: FanSpeed::Auto,
        set_point,
        current_temp,
        error_code: 0,
    }
}
