use crate::gis::frame::{self, RESPONSE_LEN};
use crate::prelude::*;

use {
    bytes::BytesMut,
    net2::TcpStreamExt,
    serde::Serialize,
    std::time::Duration,
    tokio::io::{AsyncReadExt, AsyncWriteExt},
    tokio::net::TcpStream,
    tokio::time::{timeout, timeout_at, Instant},
};

const WRITE_TIMEOUT_SECS: u64 = 5; // Timeout for write operations
const TCP_KEEPALIVE_SECS: u64 = 60; // TCP keepalive interval
const ACK_BUFFER_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    Disconnected,
    Connected,
    Polling,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connected => "connected",
            LinkState::Polling => "polling",
        };
        write!(f, "{}", s)
    }
}

/// The single TCP link to the telemetry device.
///
/// One owner, one client: the device's wake-up state machine cannot cope
/// with interleaved exchanges, so nothing here is shared.
pub struct Session {
    config: config::Device,
    stream: Option<TcpStream>,
    state: LinkState,
    reconnects: u64,
}

impl Session {
    pub fn new(config: config::Device) -> Self {
        Self {
            config,
            stream: None,
            state: LinkState::Disconnected,
            reconnects: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Number of close+connect pairs triggered by failed polls.
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// Opens the socket. Does nothing if already connected.
    pub async fn connect(&mut self) -> Result<(), ConnectError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let addr = self.config.addr();
        info!("device {}: attempting connection", addr);

        let unreachable = |source: std::io::Error| ConnectError::Unreachable {
            addr: addr.clone(),
            source,
        };

        let stream = match timeout(
            Duration::from_millis(self.config.connect_timeout_ms()),
            TcpStream::connect((self.config.host(), self.config.port())),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(unreachable(e)),
            Err(_) => {
                return Err(unreachable(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("no connection after {}ms", self.config.connect_timeout_ms()),
                )))
            }
        };

        // Configure TCP socket
        let std_stream = stream.into_std().map_err(unreachable)?;
        if let Err(e) = std_stream.set_keepalive(Some(Duration::new(TCP_KEEPALIVE_SECS, 0))) {
            warn!("Failed to set TCP keepalive: {}", e);
        }
        let stream = TcpStream::from_std(std_stream).map_err(unreachable)?;

        if self.config.use_tcp_nodelay() {
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY: {}", e);
            }
        }

        info!("device {}: TCP connection established", addr);

        self.stream = Some(stream);
        self.state = LinkState::Connected;

        Ok(())
    }

    /// Releases the socket. Safe to call when already disconnected.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            info!("device {}: connection closed", self.config.addr());
        }
        self.state = LinkState::Disconnected;
    }

    /// One full wake-up, request, response cycle.
    ///
    /// A socket failure anywhere in the exchange closes the link and makes a
    /// single reconnect attempt before `PollError::Transient` is returned.
    /// Retrying is left to the next tick.
    pub async fn poll_once(&mut self) -> Result<DecodedSample, PollError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(PollError::NotConnected);
        };

        self.state = LinkState::Polling;

        let result = Self::exchange(stream, &self.config).await;

        match result {
            Ok(raw) => {
                self.state = LinkState::Connected;
                Ok(frame::decode_response(&raw)?)
            }
            Err(e) => {
                warn!("device {}: {}, reconnecting", self.config.addr(), e);

                self.close();
                self.reconnects += 1;
                if let Err(ce) = self.connect().await {
                    warn!("{}", ce);
                }

                Err(e)
            }
        }
    }

    async fn exchange(stream: &mut TcpStream, config: &config::Device) -> Result<BytesMut, PollError> {
        let read_timeout = Duration::from_millis(config.read_timeout_ms());

        // 1. wake the device up and swallow whatever it answers
        send(stream, &frame::encode_wake_up(), "wake-up").await?;
        trace!("wake-up sent, settling {}ms", config.wake_settle_ms());
        tokio::time::sleep(Duration::from_millis(config.wake_settle_ms())).await;

        let mut ack = [0u8; ACK_BUFFER_SIZE];
        let len = match timeout(read_timeout, stream.read(&mut ack)).await {
            Ok(Ok(0)) => return Err(transient("wake-up", "connection closed by peer")),
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(transient("wake-up", e)),
            Err(_) => {
                return Err(transient(
                    "wake-up",
                    format!("no acknowledgement within {}ms", config.read_timeout_ms()),
                ))
            }
        };
        debug!("wake-up acknowledged: {:02x?}", &ack[..len]);

        // 2. hardware settle time before the device accepts a request
        tokio::time::sleep(Duration::from_millis(config.request_settle_ms())).await;

        // 3. request the telemetry block
        send(stream, &frame::encode_read_request(), "request").await?;

        // 4. collect the response
        let mut buf = BytesMut::with_capacity(RESPONSE_LEN);
        let deadline = Instant::now() + read_timeout;

        while buf.len() < RESPONSE_LEN {
            match timeout_at(deadline, stream.read_buf(&mut buf)).await {
                Ok(Ok(0)) => {
                    return Err(transient(
                        "response",
                        format!("connection closed after {} of {} bytes", buf.len(), RESPONSE_LEN),
                    ))
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(transient("response", e)),
                Err(_) if buf.is_empty() => {
                    return Err(transient(
                        "response",
                        format!("no data received for {}ms", config.read_timeout_ms()),
                    ))
                }
                Err(_) => {
                    warn!(
                        "response incomplete after {}ms: {} of {} bytes, decoding what arrived",
                        config.read_timeout_ms(),
                        buf.len(),
                        RESPONSE_LEN
                    );
                    break;
                }
            }
        }

        debug!("RX {} bytes", buf.len());

        Ok(buf)
    }
}

async fn send(stream: &mut TcpStream, bytes: &[u8], stage: &'static str) -> Result<(), PollError> {
    match timeout(Duration::from_secs(WRITE_TIMEOUT_SECS), stream.write_all(bytes)).await {
        Ok(Ok(_)) => {
            trace!("TX {} {:02x?}", stage, bytes);
            stream.flush().await.map_err(|e| transient(stage, e))
        }
        Ok(Err(e)) => Err(transient(stage, e)),
        Err(_) => Err(transient(
            stage,
            format!("write timeout after {} seconds", WRITE_TIMEOUT_SECS),
        )),
    }
}

fn transient(stage: &'static str, reason: impl std::fmt::Display) -> PollError {
    PollError::Transient {
        stage,
        reason: reason.to_string(),
    }
}
