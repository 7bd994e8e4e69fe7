//! LIRC client for windsync.
//!
//! Talks to an `lircd` daemon over its line-oriented TCP protocol:
//! - `SEND_ONCE <remote> <command>` fires one IR code
//! - `SET_TRANSMITTERS <channels>` picks the active IR emitters
//!
//! The connection is kept open between commands and re-established once
//! per command when it turns out to be dead.

mod client;
mod error;
mod mapping;
mod protocol;

pub use client::{CONNECT_TIMEOUT, LircClient, RETRY_DELAY};
pub use error::LircError;
pub use mapping::{RemoteMapping, STOP_KEY};
pub use protocol::{MAX_CHANNEL, OFF_COMMAND, send_once_line, set_transmitters_line, split_commands};
