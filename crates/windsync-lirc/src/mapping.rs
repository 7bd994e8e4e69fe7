//! Per-command remote overrides.
//!
//! A mapping file holds `REMOTE=COMMAND` lines. Sending `COMMAND` then uses
//! `REMOTE` instead of the configured remote. The special command `STOP`
//! names what to send instead of [`OFF_COMMAND`](crate::OFF_COMMAND) when
//! the fans are switched off, e.g. `POWER=STOP`.

use std::collections::HashMap;

use tracing::{debug, warn};

/// Mapping key whose value replaces the off command.
pub const STOP_KEY: &str = "STOP";

/// Command to remote lookup table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteMapping {
    remotes: HashMap<String, String>,
}

impl RemoteMapping {
    /// Parse mapping file contents. Malformed lines are skipped; the first
    /// entry for a command wins.
    pub fn parse(text: &str) -> Self {
        let mut remotes = HashMap::new();

        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((remote, command)) = line.split_once('=') else {
                warn!(line = number + 1, "ignoring malformed mapping line");
                continue;
            };
            let (remote, command) = (remote.trim(), command.trim());
            if remote.is_empty() || command.is_empty() {
                warn!(line = number + 1, "ignoring malformed mapping line");
                continue;
            }
            remotes
                .entry(command.to_string())
                .or_insert_with(|| remote.to_string());
        }

        debug!(entries = remotes.len(), "parsed remote mapping");
        Self { remotes }
    }

    /// Remote to use for `command`, falling back to `default`.
    pub fn remote_for<'a>(&'a self, command: &str, default: &'a str) -> &'a str {
        self.remotes.get(command).map_or(default, String::as_str)
    }

    /// Command sent to switch the fans off.
    pub fn off_command(&self) -> &str {
        self.remotes
            .get(STOP_KEY)
            .map_or(crate::OFF_COMMAND, String::as_str)
    }

    /// Whether the mapping has no entries.
    pub fn is_empty(&self) -> bool {
        self.remotes.is_empty()
    }
}
