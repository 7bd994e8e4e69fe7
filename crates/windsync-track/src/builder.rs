//! Event-list building.

use std::time::Duration;

use tracing::{debug, warn};

use crate::{TrackWarning, parse_timecode};

/// Command text that means "fans off".
pub const DEFAULT_COMMAND: &str = "OFF";

/// Minimum spacing between two consecutive events, in milliseconds.
pub const MIN_EVENT_SPACING_MS: i64 = 500;

/// Marker that introduces the file's own offset in a header line.
const OFFSET_MARKER: &str = "Offset:";

/// Timeline shifts applied while building a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offsets {
    /// Subtracted from every timecode.
    pub global_ms: i64,
    /// Subtracted when the fans start from off.
    pub spinup_ms: i64,
    /// Subtracted when the fans go to off.
    pub spindown_ms: i64,
    /// Apply the `Offset: (...)` declared in the file header.
    pub special_enabled: bool,
}

impl Default for Offsets {
    fn default() -> Self {
        Self {
            global_ms: 2500,
            spinup_ms: 1500,
            spindown_ms: 0,
            special_enabled: false,
        }
    }
}

/// One fan command at a timeline position.
///
/// `command` may hold several comma-joined IR command names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedCommand {
    pub position: Duration,
    pub command: String,
}

/// A parsed wind track.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindTrack {
    /// Leading `#` lines, with the `#` and leading spaces removed.
    pub header: Vec<String>,
    /// Offset declared in the header, in milliseconds (0 if none).
    pub special_offset_ms: i64,
    /// Events in ascending position order.
    pub events: Vec<TimedCommand>,
    /// First problem found while parsing, if any.
    pub warning: Option<TrackWarning>,
}

impl WindTrack {
    /// Build a track from the text of a wind-track file.
    pub fn parse(text: &str, offsets: &Offsets) -> Self {
        Self::from_lines(text.lines(), offsets)
    }

    /// Build a track from individual lines.
    pub fn from_lines<'a, I>(lines: I, offsets: &Offsets) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut builder = Builder::new(*offsets);
        for (i, line) in lines.into_iter().enumerate() {
            if !builder.push_line(i + 1, line) {
                break;
            }
        }
        builder.track
    }

    /// Whether the track produced no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

struct Builder {
    offsets: Offsets,
    track: WindTrack,
    /// Last accepted timecode before spin offsets, for order checking.
    raw_prev_ms: Option<i64>,
    /// Position of the last emitted event.
    prev_ms: i64,
    /// First command of the last emitted event.
    prev_command: String,
}

impl Builder {
    fn new(offsets: Offsets) -> Self {
        Self {
            offsets,
            track: WindTrack::default(),
            raw_prev_ms: None,
            prev_ms: -MIN_EVENT_SPACING_MS,
            prev_command: DEFAULT_COMMAND.to_string(),
        }
    }

    /// Consume one line. Returns false when the rest of the file must be ignored.
    fn push_line(&mut self, line_no: usize, line: &str) -> bool {
        if line.starts_with('#') && self.track.events.is_empty() {
            self.push_header(line);
            return true;
        }

        if line.trim().is_empty() || line.starts_with("\\\\") || line.starts_with("//") {
            return true;
        }

        let mut fields = line.split(',');
        let timecode = fields.next().unwrap_or_default();
        let commands: Vec<&str> = fields.collect();

        let mut position_ms = match parse_timecode(timecode) {
            Ok(ms) => ms.saturating_sub(self.offsets.global_ms),
            Err(_) => {
                self.warn(TrackWarning::BadTimecode {
                    line: line_no,
                    text: line.to_string(),
                });
                return true;
            }
        };

        if commands.is_empty() {
            self.warn(TrackWarning::MissingCommand {
                line: line_no,
                text: line.to_string(),
            });
            return true;
        }

        // The order check happens in the shifted frame, so the tracker moves too.
        if self.offsets.special_enabled {
            let special = self.track.special_offset_ms;
            position_ms = position_ms.saturating_add(special);
            self.raw_prev_ms = self.raw_prev_ms.map(|prev| prev.saturating_add(special));
        }

        if let Some(raw_prev) = self.raw_prev_ms
            && position_ms < raw_prev
        {
            self.warn(TrackWarning::OutOfOrder { line: line_no });
            return false;
        }
        self.raw_prev_ms = Some(position_ms);

        let first_command = commands[0];
        if self.prev_command.contains(DEFAULT_COMMAND) {
            position_ms = position_ms.saturating_sub(self.offsets.spinup_ms);
        } else if first_command.contains(DEFAULT_COMMAND) {
            position_ms = position_ms.saturating_sub(self.offsets.spindown_ms);
        }

        let floor = self.prev_ms.saturating_add(MIN_EVENT_SPACING_MS);
        if position_ms < floor {
            position_ms = floor;
        }

        // Only one event may sit at the start of the file.
        if position_ms <= 0 {
            if !self.track.events.is_empty() {
                debug!(
                    line = line_no,
                    dropped = self.track.events.len(),
                    "start-of-file event replaces earlier events"
                );
            }
            self.track.events.clear();
            position_ms = 0;
        }

        let command = commands.join(",").trim_matches(',').to_string();
        self.track.events.push(TimedCommand {
            position: Duration::from_millis(position_ms as u64),
            command,
        });
        self.prev_command = first_command.to_string();
        self.prev_ms = position_ms;
        true
    }

    fn push_header(&mut self, line: &str) {
        self.track
            .header
            .push(line.trim_start_matches(['#', ' ']).to_string());

        if !line.contains(OFFSET_MARKER) {
            return;
        }

        let inner = match (line.find('('), line.rfind(')')) {
            (Some(open), Some(close)) if open < close => &line[open + 1..close],
            _ => return,
        };
        match parse_timecode(inner) {
            Ok(ms) => self.track.special_offset_ms = ms,
            Err(e) => debug!(error = %e, "ignoring unparsable header offset"),
        }
    }

    fn warn(&mut self, warning: TrackWarning) {
        warn!(warning = %warning, "wind track problem");
        if self.track.warning.is_none() {
            self.track.warning = Some(warning);
        }
    }
}
