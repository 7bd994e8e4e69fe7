//! Sidecar lookup and loading.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::{Offsets, TrackError, WindTrack};

/// Extension appended to the video name to form the sidecar file name.
pub const WINDTRACK_EXTENSION: &str = "txt";

/// Find the wind track for a video.
///
/// The dedicated wind-track directory wins over the video's own directory.
pub fn locate(windtrack_dir: &Path, video_dir: &Path, video_name: &str) -> Option<PathBuf> {
    if video_name.is_empty() {
        return None;
    }

    let file_name = format!("{}.{}", video_name, WINDTRACK_EXTENSION);
    [windtrack_dir, video_dir]
        .into_iter()
        .map(|dir| dir.join(&file_name))
        .find(|candidate| {
            let found = candidate.is_file();
            debug!(path = %candidate.display(), found, "checked for wind track");
            found
        })
}

/// Read and build the wind track at `path`.
#[tracing::instrument(skip_all, fields(path = %path.display()))]
pub async fn load(path: &Path, offsets: &Offsets) -> Result<WindTrack, TrackError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| TrackError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    let track = WindTrack::parse(&text, offsets);
    info!(
        events = track.events.len(),
        warning = ?track.warning.as_ref().map(ToString::to_string),
        "loaded wind track"
    );
    Ok(track)
}
