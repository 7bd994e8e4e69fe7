//! Wind-track files for windsync.
//!
//! A wind track is a sidecar text file next to a video that lists fan
//! commands against timeline positions. This crate:
//! - Parses `H:MM:SS[.fff]` timecodes
//! - Builds an ordered, offset-adjusted list of timed commands
//! - Locates and loads the sidecar for a playing video

mod builder;
mod error;
mod loader;
mod timecode;

pub use builder::{DEFAULT_COMMAND, MIN_EVENT_SPACING_MS, Offsets, TimedCommand, WindTrack};
pub use error::{TimecodeError, TrackError, TrackWarning};
pub use loader::{WINDTRACK_EXTENSION, load, locate};
pub use timecode::{format_position, parse_timecode};
