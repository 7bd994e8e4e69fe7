//! Media player adapters.
//!
//! The sync loop only needs a periodic snapshot of the player: what file is
//! open, whether it is playing, and where playback is.

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info};

/// Default MPC-HC/MPC-BE web interface address.
pub const DEFAULT_MPC_ADDR: &str = "127.0.0.1:13579";

/// Connect timeout for player polls.
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Total timeout for a single player poll.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// MPC reports positions in whole milliseconds but only refreshes them
/// every few frames.
const MPC_POSITION_RESOLUTION: Duration = Duration::from_millis(50);

/// MPC `state` value for playback in progress.
const MPC_STATE_PLAYING: &str = "2";

static VARIABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<p id="([^"]+)">([^<]*)</p>"#).unwrap());

/// Errors that can occur when polling a player.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// The request failed.
    #[error("cannot reach media player: {0}")]
    Http(#[from] reqwest::Error),

    /// The player answered with an error status.
    #[error("media player returned HTTP {0}")]
    Status(u16),

    /// A required field was missing from the response.
    #[error("media player response is missing `{0}`")]
    MissingField(&'static str),

    /// A field could not be interpreted.
    #[error("media player sent invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

/// One snapshot of player state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerStatus {
    /// Whether playback is in progress.
    pub playing: bool,
    /// Playback position.
    pub position: Duration,
    /// Identity of the open file: its name without extension, or empty.
    pub file_name: String,
    /// Directory of the open file.
    pub file_dir: PathBuf,
}

/// A media player that can be polled for its playback state.
#[async_trait]
pub trait Player: Send {
    /// Fetch the current state.
    async fn poll(&mut self) -> Result<PlayerStatus, PlayerError>;

    /// Granularity of the reported position.
    fn position_resolution(&self) -> Duration;

    /// Drop any connection state after a failed poll.
    async fn reset(&mut self) {}
}

/// MPC-HC / MPC-BE web interface client.
pub struct MpcPlayer {
    base_url: String,
    http: Client,
}

impl MpcPlayer {
    /// Create a client for the web interface at `addr`, either `host:port`
    /// or a full base URL.
    pub fn new(addr: &str) -> Self {
        let base_url = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", addr)
        };

        Self {
            base_url,
            http: build_client(),
        }
    }

    /// Base URL of the web interface.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn build_client() -> Client {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| Client::new())
}

#[async_trait]
impl Player for MpcPlayer {
    async fn poll(&mut self) -> Result<PlayerStatus, PlayerError> {
        let url = format!("{}/variables.html", self.base_url);
        let response = self.http.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(PlayerError::Status(response.status().as_u16()));
        }

        let body = response.text().await?;
        let status = parse_variables(&body)?;
        debug!(
            playing = status.playing,
            position_ms = status.position.as_millis() as u64,
            file = %status.file_name,
            "polled MPC"
        );
        Ok(status)
    }

    fn position_resolution(&self) -> Duration {
        MPC_POSITION_RESOLUTION
    }

    async fn reset(&mut self) {
        info!(url = %self.base_url, "resetting MPC connection");
        self.http = build_client();
    }
}

/// Parse the `variables.html` page served by MPC.
pub fn parse_variables(body: &str) -> Result<PlayerStatus, PlayerError> {
    let mut state = None;
    let mut position = None;
    let mut file = None;
    let mut file_dir = None;

    for caps in VARIABLE_RE.captures_iter(body) {
        let value = unescape(&caps[2]);
        match &caps[1] {
            "state" => state = Some(value),
            "position" => position = Some(value),
            "file" => file = Some(value),
            "filedir" => file_dir = Some(value),
            _ => {}
        }
    }

    let state = state.ok_or(PlayerError::MissingField("state"))?;
    let position = position.ok_or(PlayerError::MissingField("position"))?;
    let position_ms: u64 = position
        .trim()
        .parse()
        .map_err(|_| PlayerError::InvalidField {
            field: "position",
            value: position.clone(),
        })?;

    Ok(PlayerStatus {
        playing: state.trim() == MPC_STATE_PLAYING,
        position: Duration::from_millis(position_ms),
        file_name: file.as_deref().map(file_stem).unwrap_or_default(),
        file_dir: file_dir.map(PathBuf::from).unwrap_or_default(),
    })
}

/// File name without its last extension.
fn file_stem(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name.to_string(),
    }
}

fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
