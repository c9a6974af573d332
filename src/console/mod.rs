#[cfg(test)]
pub mod mock;

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::LabError;
use crate::models::ConsoleEndpoint;
use crate::utils::console_text;

/// Upper bound on bytes kept from a single read; a chatty console cannot grow it further
pub const MAX_READ_BYTES: usize = 256 * 1024;

pub trait ConsoleStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ConsoleStream for T {}

pub type BoxedStream = Box<dyn ConsoleStream>;

/// Opens byte streams to device consoles. TCP for real labs; tests script it.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &ConsoleEndpoint) -> io::Result<BoxedStream>;
}

/// Raw TCP to a telnet console port
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &ConsoleEndpoint) -> io::Result<BoxedStream> {
        let stream = TcpStream::connect(endpoint.addr()).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

/// Poll until the console accepts a TCP connection. Each probe connection is
/// dropped right away. Returns false once `limit` elapses or on cancellation.
pub async fn wait_until_accepting_connections(
    connector: &dyn Connector,
    endpoint: &ConsoleEndpoint,
    limit: Duration,
    poll: Duration,
    cancel: &CancellationToken,
) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        let attempt = tokio::select! {
            _ = cancel.cancelled() => return false,
            res = timeout(remaining, connector.connect(endpoint)) => res,
        };
        match attempt {
            Ok(Ok(_probe)) => return true,
            Ok(Err(e)) => tracing::debug!("Console {} not accepting yet: {}", endpoint, e),
            Err(_) => return false,
        }
        let pause = poll.min(deadline.saturating_duration_since(Instant::now()));
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = sleep(pause) => {}
        }
    }
}

enum SessionState {
    Idle,
    Open(BoxedStream),
    Closed,
}

/// ConsoleSession is one exclusive, single-use connection to a device console.
/// Idle -> Open -> Closed; once closed it cannot be reopened.
pub struct ConsoleSession {
    endpoint: ConsoleEndpoint,
    state: SessionState,
    cancel: CancellationToken,
}

impl ConsoleSession {
    pub fn new(endpoint: ConsoleEndpoint, parent: &CancellationToken) -> Self {
        Self {
            endpoint,
            state: SessionState::Idle,
            cancel: parent.child_token(),
        }
    }

    pub fn endpoint(&self) -> &ConsoleEndpoint {
        &self.endpoint
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, SessionState::Open(_))
    }

    /// Connect within `connect_timeout`
    pub async fn open(&mut self, connector: &dyn Connector, connect_timeout: Duration) -> Result<(), LabError> {
        match self.state {
            SessionState::Open(_) => return Ok(()),
            SessionState::Closed => return Err(LabError::SessionClosed),
            SessionState::Idle => {}
        }

        let attempt = tokio::select! {
            _ = self.cancel.cancelled() => {
                self.state = SessionState::Closed;
                return Err(LabError::Cancelled);
            }
            res = timeout(connect_timeout, connector.connect(&self.endpoint)) => res,
        };
        match attempt {
            Ok(Ok(stream)) => {
                tracing::debug!("Console {} open", self.endpoint);
                self.state = SessionState::Open(stream);
                Ok(())
            }
            Ok(Err(e)) => {
                self.state = SessionState::Closed;
                Err(LabError::console_unavailable(&self.endpoint, e.to_string()))
            }
            Err(_) => {
                self.state = SessionState::Closed;
                Err(LabError::connect_timeout(&self.endpoint, connect_timeout))
            }
        }
    }

    /// Write `text` plus a newline, then wait `settle` for the device to process it
    pub async fn send_line(&mut self, text: &str, settle: Duration) -> Result<(), LabError> {
        let SessionState::Open(stream) = &mut self.state else {
            return Err(LabError::SessionClosed);
        };
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');

        let written = async {
            stream.write_all(line.as_bytes()).await?;
            stream.flush().await
        };
        let result = tokio::select! {
            _ = self.cancel.cancelled() => Err(LabError::Cancelled),
            res = written => res.map_err(|e| LabError::console_unavailable(&self.endpoint, e.to_string())),
        };
        if let Err(e) = result {
            self.close().await;
            return Err(e);
        }

        tokio::select! {
            _ = self.cancel.cancelled() => {
                self.close().await;
                Err(LabError::Cancelled)
            }
            _ = sleep(settle) => Ok(()),
        }
    }

    /// Collect output until the console has been silent for `quiet`, the
    /// stream ends, or the read cap is hit. Returns decoded text.
    pub async fn read_available(&mut self, quiet: Duration) -> Result<String, LabError> {
        let SessionState::Open(stream) = &mut self.state else {
            return Err(LabError::SessionClosed);
        };
        let mut collected = Vec::new();
        let mut buf = [0u8; 4096];
        let mut eof = false;
        let mut failure = None;

        while collected.len() < MAX_READ_BYTES {
            let read = tokio::select! {
                _ = self.cancel.cancelled() => None,
                res = timeout(quiet, stream.read(&mut buf)) => Some(res),
            };
            match read {
                None => {
                    failure = Some(LabError::Cancelled);
                    break;
                }
                // quiet period elapsed
                Some(Err(_)) => break,
                Some(Ok(Ok(0))) => {
                    eof = true;
                    break;
                }
                Some(Ok(Ok(n))) => {
                    let room = MAX_READ_BYTES - collected.len();
                    collected.extend_from_slice(&buf[..n.min(room)]);
                }
                Some(Ok(Err(e))) => {
                    failure = Some(LabError::console_unavailable(&self.endpoint, e.to_string()));
                    break;
                }
            }
        }

        if let Some(e) = failure {
            self.close().await;
            return Err(e);
        }
        if eof {
            tracing::debug!("Console {} closed by remote", self.endpoint);
            self.close().await;
        }
        Ok(console_text(&collected))
    }

    /// Idempotent; a closed session stays closed
    pub async fn close(&mut self) {
        if let SessionState::Open(mut stream) = std::mem::replace(&mut self.state, SessionState::Closed) {
            let _ = stream.shutdown().await;
            tracing::debug!("Console {} closed", self.endpoint);
        }
    }
}
