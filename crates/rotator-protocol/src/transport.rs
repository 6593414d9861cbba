//! Device Transports
//!
//! A transport writes command lines and reads everything up to the next
//! prompt. How the console is reached (spawned `rotctl`, TCP bridge, pipe)
//! is the transport's business; the command channel only sees this trait.

use crate::{Result, RotatorError};
use std::future::Future;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::{debug, info, warn};

/// Prompt printed by `rotctl` in interactive mode
pub const ROTCTL_PROMPT: &str = "Rotator command:";

/// Largest answer accepted without seeing a prompt
pub const MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// Byte-stream connection to a rotator console.
pub trait DeviceTransport: Send + 'static {
    /// Write one command line; the terminator is added here.
    fn write_line(&mut self, line: &str) -> impl Future<Output = Result<()>> + Send;

    /// Read until the prompt and return the text before it.
    fn read_until_prompt(&mut self) -> impl Future<Output = Result<String>> + Send;

    /// Release the connection. Closing an already closed transport is not an error.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Prompt-delimited console over any reader/writer pair
pub struct StreamTransport<R, W> {
    reader: R,
    writer: W,
    prompt: String,
    buffer: Vec<u8>,
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W, prompt: impl Into<String>) -> Self {
        Self {
            reader,
            writer,
            prompt: prompt.into(),
            buffer: Vec::new(),
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Bytes received but not yet consumed by a prompt match
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }
}

impl StreamTransport<OwnedReadHalf, OwnedWriteHalf> {
    /// Open a console exposed on a TCP socket (serial-over-IP bridge, remote shell).
    pub async fn connect(addr: &str, prompt: impl Into<String>) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.map_err(RotatorError::from_io)?;
        stream.set_nodelay(true)?;
        info!("Connected to rotator console at {}", addr);

        let (reader, writer) = stream.into_split();
        Ok(Self::new(reader, writer, prompt))
    }
}

impl<R, W> DeviceTransport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');

        self.writer
            .write_all(&bytes)
            .await
            .map_err(RotatorError::from_io)?;
        self.writer.flush().await.map_err(RotatorError::from_io)
    }

    async fn read_until_prompt(&mut self) -> Result<String> {
        let mut chunk = [0u8; 256];

        loop {
            if let Some(at) = find(&self.buffer, self.prompt.as_bytes()) {
                let consumed: Vec<u8> = self.buffer.drain(..at + self.prompt.len()).collect();
                return Ok(String::from_utf8_lossy(&consumed[..at]).into_owned());
            }

            if self.buffer.len() > MAX_RESPONSE_BYTES {
                let size = self.buffer.len();
                self.buffer.clear();
                return Err(RotatorError::MalformedResponse(format!(
                    "{size} bytes without a prompt"
                )));
            }

            // Data is only appended after a completed read, so a deadline
            // firing here loses nothing already received.
            let n = self.reader.read(&mut chunk).await.map_err(RotatorError::from_io)?;
            if n == 0 {
                debug!("Received EOF from rotator console");
                return Err(RotatorError::TransportClosed);
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self.writer.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) => match RotatorError::from_io(e) {
                RotatorError::TransportClosed => Ok(()),
                other => Err(other),
            },
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Console of a spawned control process, normally hamlib `rotctl`
pub struct ProcessTransport {
    child: Child,
    stream: StreamTransport<ChildStdout, ChildStdin>,
}

impl ProcessTransport {
    /// Spawn `rotctl -m <model> -r <device>` and wait for its first prompt,
    /// normally [`ROTCTL_PROMPT`].
    pub async fn spawn_rotctl(model: u32, device: &str, prompt: &str, startup_timeout: Duration) -> Result<Self> {
        let mut cmd = tokio::process::Command::new("rotctl");
        cmd.arg("-m").arg(model.to_string()).arg("-r").arg(device);
        Self::spawn(cmd, prompt, startup_timeout).await
    }

    /// Spawn any console program that prints `prompt` when ready for a command.
    pub async fn spawn(
        mut cmd: tokio::process::Command,
        prompt: &str,
        startup_timeout: Duration,
    ) -> Result<Self> {
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let (Some(stdout), Some(stdin)) = (child.stdout.take(), child.stdin.take()) else {
            return Err(RotatorError::TransportClosed);
        };

        let mut transport = Self {
            child,
            stream: StreamTransport::new(stdout, stdin, prompt),
        };

        match tokio::time::timeout(startup_timeout, transport.stream.read_until_prompt()).await {
            Ok(Ok(banner)) => {
                debug!(banner = %banner.trim(), "Rotator console ready");
                Ok(transport)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!("No prompt from rotator console within {:?}", startup_timeout);
                Err(RotatorError::Timeout {
                    command: "<startup>".to_string(),
                    timeout: startup_timeout,
                })
            }
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

impl DeviceTransport for ProcessTransport {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.stream.write_line(line).await
    }

    async fn read_until_prompt(&mut self) -> Result<String> {
        self.stream.read_until_prompt().await
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.close().await?;

        match tokio::time::timeout(Duration::from_secs(1), self.child.wait()).await {
            Ok(status) => {
                debug!(?status, "Rotator console exited");
                Ok(())
            }
            Err(_) => {
                warn!("Rotator console did not exit, killing it");
                self.child.kill().await.map_err(RotatorError::from_io)
            }
        }
    }
}
