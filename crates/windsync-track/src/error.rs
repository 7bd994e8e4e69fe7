//! Error types for wind-track handling.

use std::path::PathBuf;

use thiserror::Error;

/// A timecode that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid timecode: {0:?}")]
pub struct TimecodeError(pub String);

/// Non-fatal problems found while building a wind track.
///
/// Only the first one is kept; the usable part of the file is still loaded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackWarning {
    /// The timecode column of a data line did not parse.
    #[error("Bad timecode on line {line}: {text}")]
    BadTimecode { line: usize, text: String },

    /// A data line had a timecode but no command.
    #[error("Missing command on line {line}: {text}")]
    MissingCommand { line: usize, text: String },

    /// A timecode went backwards; nothing after it was loaded.
    #[error("Timecode on line {line} is out of order")]
    OutOfOrder { line: usize },
}

/// Errors that can occur when loading a wind track.
#[derive(Debug, Error)]
pub enum TrackError {
    /// The sidecar file could not be read.
    #[error("failed to read wind track {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
