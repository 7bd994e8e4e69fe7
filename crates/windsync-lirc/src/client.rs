//! Persistent lircd connection.

use std::io;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, trace, warn};

use crate::protocol::{send_once_line, set_transmitters_line, split_commands};
use crate::{LircError, RemoteMapping};

/// Upper bound on establishing a connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause before reconnecting after a failed send.
pub const RETRY_DELAY: Duration = Duration::from_millis(75);

/// How long to wait for the socket to report replies or a hang-up.
const PROBE_WAIT: Duration = Duration::from_millis(1);

/// Client for one lircd daemon.
///
/// Connects lazily and keeps the connection between commands. Each line is
/// retried once over a fresh connection if the first attempt fails.
pub struct LircClient {
    addr: String,
    remote: String,
    mapping: RemoteMapping,
    stream: Option<TcpStream>,
}

impl LircClient {
    /// Create a client for the daemon at `addr` (`host:port`) sending codes
    /// for `remote`.
    pub fn new(addr: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            remote: remote.into(),
            mapping: RemoteMapping::default(),
            stream: None,
        }
    }

    /// Use per-command remote overrides.
    pub fn with_mapping(mut self, mapping: RemoteMapping) -> Self {
        self.mapping = mapping;
        self
    }

    /// Daemon address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Replace the per-command remote overrides.
    pub fn set_mapping(&mut self, mapping: RemoteMapping) {
        self.mapping = mapping;
    }

    /// Close the connection; the next command reconnects.
    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            info!(addr = %self.addr, "disconnected from LIRC");
        }
    }

    /// Whether a connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// (Re)open the connection, dropping any existing one.
    pub async fn connect(&mut self) -> Result<(), LircError> {
        self.stream = None;

        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| LircError::ConnectTimeout {
                addr: self.addr.clone(),
            })?
            .map_err(|source| LircError::Connect {
                addr: self.addr.clone(),
                source,
            })?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "failed to set TCP_NODELAY");
        }

        info!(addr = %self.addr, "connected to LIRC");
        self.stream = Some(stream);
        Ok(())
    }

    /// Send a wind-track command, which may name several comma-separated
    /// codes, in order.
    pub async fn send_commands(&mut self, commands: &str) -> Result<(), LircError> {
        for command in split_commands(commands) {
            self.send_once(command).await?;
        }
        Ok(())
    }

    /// Switch the fans off.
    pub async fn send_off(&mut self) -> Result<(), LircError> {
        let off = self.mapping.off_command().to_string();
        self.send_commands(&off).await
    }

    /// Fire a single code.
    pub async fn send_once(&mut self, command: &str) -> Result<(), LircError> {
        let remote = self.mapping.remote_for(command, &self.remote);
        let line = send_once_line(remote, command);
        self.send_line(&line).await
    }

    /// Select the active IR emitters.
    pub async fn set_transmitters(&mut self, channels: &[u8]) -> Result<(), LircError> {
        let line = set_transmitters_line(channels)?;
        self.send_line(&line).await
    }

    /// Write one protocol line, reconnecting and retrying once on failure.
    #[tracing::instrument(skip(self), fields(addr = %self.addr))]
    pub async fn send_line(&mut self, line: &str) -> Result<(), LircError> {
        match self.try_send(line).await {
            Ok(()) => return Ok(()),
            Err(e) => warn!(error = %e, "send failed, reconnecting"),
        }

        self.stream = None;
        sleep(RETRY_DELAY).await;
        self.try_send(line).await
    }

    async fn try_send(&mut self, line: &str) -> Result<(), LircError> {
        if self.stream.is_none() {
            self.connect().await?;
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(self.send_error(io::ErrorKind::NotConnected.into()));
        };

        let result = async {
            probe(stream).await?;
            stream.write_all(line.as_bytes()).await?;
            probe(stream).await
        }
        .await;

        match result {
            Ok(()) => {
                trace!(line = line.trim_end(), "sent");
                Ok(())
            }
            Err(source) => {
                self.stream = None;
                Err(self.send_error(source))
            }
        }
    }

    fn send_error(&self, source: io::Error) -> LircError {
        LircError::Send {
            addr: self.addr.clone(),
            source,
        }
    }
}

/// Discard pending replies and fail if the peer has hung up.
async fn probe(stream: &TcpStream) -> io::Result<()> {
    if timeout(PROBE_WAIT, stream.readable()).await.is_err() {
        return Ok(());
    }

    let mut buf = [0u8; 512];
    loop {
        match stream.try_read(&mut buf) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "connection closed by LIRC",
                ));
            }
            Ok(n) => trace!(bytes = n, "discarded reply"),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}
