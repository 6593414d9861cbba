//! Rotator connection selection

use crate::config::RotatorConfig;
use rotator_protocol::{
    DeviceTransport, MockTransport, Position, ProcessTransport, Result, StreamTransport,
};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::info;

/// Whichever transport the configuration asked for
pub enum Connection {
    /// `rotctl` spawned locally
    Process(ProcessTransport),
    /// Console on a TCP socket
    Tcp(StreamTransport<OwnedReadHalf, OwnedWriteHalf>),
    /// In-memory rotator for dry runs
    Mock(MockTransport),
}

impl Connection {
    /// Mock if asked, else TCP if an address is configured, else spawn rotctl.
    pub async fn open(config: &RotatorConfig, mock: bool) -> Result<Self> {
        if mock {
            info!("Using mock rotator");
            let transport = MockTransport::new()
                .with_reported(Position::new(0.0, 0.0))
                .following_commands();
            return Ok(Connection::Mock(transport));
        }

        match &config.connect {
            Some(addr) => Ok(Connection::Tcp(
                StreamTransport::connect(addr, config.prompt.clone()).await?,
            )),
            None => {
                info!(model = config.model, device = %config.device, "Spawning rotctl");
                Ok(Connection::Process(
                    ProcessTransport::spawn_rotctl(
                        config.model,
                        &config.device,
                        &config.prompt,
                        config.startup_timeout(),
                    )
                    .await?,
                ))
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Connection::Process(_) => "rotctl",
            Connection::Tcp(_) => "tcp",
            Connection::Mock(_) => "mock",
        }
    }
}

impl DeviceTransport for Connection {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        match self {
            Connection::Process(p) => p.write_line(line).await,
            Connection::Tcp(t) => t.write_line(line).await,
            Connection::Mock(m) => m.write_line(line).await,
        }
    }

    async fn read_until_prompt(&mut self) -> Result<String> {
        match self {
            Connection::Process(p) => p.read_until_prompt().await,
            Connection::Tcp(t) => t.read_until_prompt().await,
            Connection::Mock(m) => m.read_until_prompt().await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Connection::Process(p) => p.close().await,
            Connection::Tcp(t) => t.close().await,
            Connection::Mock(m) => m.close().await,
        }
    }
}
