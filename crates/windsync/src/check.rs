//! Check command: show how a wind track will be scheduled.

use std::path::Path;

use miette::Result;

use windsync_track::{Offsets, format_position};

/// Build the wind track at `path` and print its events.
///
/// Fails if the file has a problem, so scripts can validate tracks.
pub async fn run(path: &Path, offsets: &Offsets) -> Result<()> {
    let track = windsync_track::load(path, offsets)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    for line in &track.header {
        println!("# {}", line);
    }
    if track.special_offset_ms != 0 {
        println!(
            "Header offset: {} ms ({})",
            track.special_offset_ms,
            if offsets.special_enabled { "applied" } else { "ignored" }
        );
    }

    println!("{} events:", track.events.len());
    for event in &track.events {
        println!("  {}  {}", format_position(event.position), event.command);
    }

    match &track.warning {
        Some(warning) => Err(miette::miette!("{}", warning)),
        None if track.is_empty() => Err(miette::miette!("{} has no events", path.display())),
        None => Ok(()),
    }
}
