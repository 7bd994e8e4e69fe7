//! Error types for the LIRC client.

use thiserror::Error;

/// Errors that can occur when talking to lircd.
#[derive(Debug, Error)]
pub enum LircError {
    /// The TCP connection could not be opened.
    #[error("cannot connect to LIRC at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The connection attempt did not finish in time.
    #[error("timed out connecting to LIRC at {addr}")]
    ConnectTimeout { addr: String },

    /// Writing a command failed, or the connection was found closed.
    #[error("failed sending command to LIRC at {addr}: {source}")]
    Send {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// An IR channel outside the supported range.
    #[error("IR channel {0} is out of range (1-{max})", max = crate::MAX_CHANNEL)]
    InvalidChannel(u8),

    /// No IR channel was enabled.
    #[error("at least one IR channel must be enabled")]
    NoChannels,
}

impl LircError {
    /// Address of the daemon involved, if any.
    pub fn addr(&self) -> Option<&str> {
        match self {
            LircError::Connect { addr, .. }
            | LircError::ConnectTimeout { addr }
            | LircError::Send { addr, .. } => Some(addr),
            LircError::InvalidChannel(_) | LircError::NoChannels => None,
        }
    }
}
