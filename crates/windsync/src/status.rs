//! User-visible sync status.

use std::time::Duration;

use chrono::Local;

/// Snapshot published by the sync loop after every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    /// Last error, prefixed with the local time it happened.
    pub error: Option<String>,
    /// First problem found in the loaded wind track.
    pub warning: Option<String>,
    /// Comment lines from the top of the loaded wind track.
    pub header: Vec<String>,
    /// Identity of the file open in the player.
    pub file_name: String,
    /// Whether a wind track is loaded for that file.
    pub track_loaded: bool,
    pub playing: bool,
    pub position: Duration,
    /// Index of the active wind-track command; `None` while fans are off.
    pub current_index: Option<usize>,
    /// Whether commands are forwarded to the transmitter.
    pub enabled: bool,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            error: None,
            warning: None,
            header: Vec::new(),
            file_name: String::new(),
            track_loaded: false,
            playing: false,
            position: Duration::ZERO,
            current_index: None,
            enabled: true,
        }
    }
}

/// Prefix `message` with the local wall-clock time, e.g. `(9:05:12 PM) ...`.
pub fn timestamped(message: impl std::fmt::Display) -> String {
    format!("({}) {}", Local::now().format("%-I:%M:%S %p"), message)
}
