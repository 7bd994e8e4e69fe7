//! Run command: keeps the fans in step with the media player.
//!
//! One loop polls the player, swaps schedulers when the open file changes
//! and feeds position samples to the active scheduler. Scheduler deliveries
//! run on their own tasks and share the transmitter with the loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use miette::Result;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use windsync_lirc::{LircClient, LircError, RemoteMapping};
use windsync_scheduler::{Delivery, Scheduler, Tolerance};
use windsync_track::{DEFAULT_COMMAND, Offsets, WindTrack, format_position};

use crate::player::{MpcPlayer, Player, PlayerError, PlayerStatus};
use crate::status::{SyncStatus, timestamped};

/// Default interval between player polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Pause after each delivery so IR bursts do not run into each other.
pub const DELIVERY_PACING: Duration = Duration::from_millis(250);

/// Name of the optional remote mapping file in the config directory.
const MAPPING_FILE_NAME: &str = "lircmapping.txt";

/// Settings for the sync loop.
pub struct SyncConfig {
    pub windtrack_dir: PathBuf,
    pub offsets: Offsets,
    pub channels: Vec<u8>,
    pub poll_interval: Duration,
    pub pacing: Duration,
    /// Remote mapping to re-read after a player failure.
    pub mapping: Option<MappingSource>,
}

/// Settings for the `run` command.
pub struct RunConfig {
    pub mpc_addr: String,
    pub lirc_addr: String,
    pub remote: String,
    pub sync: SyncConfig,
}

/// Where the remote mapping file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingSource {
    pub path: PathBuf,
    /// A missing file is an error rather than an empty mapping.
    pub required: bool,
}

impl MappingSource {
    /// An explicit path, or `lircmapping.txt` in the config directory.
    pub fn resolve(path: Option<&Path>) -> Option<Self> {
        match path {
            Some(path) => Some(Self {
                path: path.to_path_buf(),
                required: true,
            }),
            None => dirs::config_dir().map(|dir| Self {
                path: dir.join("windsync").join(MAPPING_FILE_NAME),
                required: false,
            }),
        }
    }

    /// Read and parse the mapping file.
    pub async fn load(&self) -> Result<RemoteMapping> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => {
                let mapping = RemoteMapping::parse(&text);
                if mapping.is_empty() {
                    warn!(path = %self.path.display(), "remote mapping has no entries");
                } else {
                    info!(path = %self.path.display(), "loaded remote mapping");
                }
                Ok(mapping)
            }
            Err(e) if !self.required && e.kind() == std::io::ErrorKind::NotFound => {
                Ok(RemoteMapping::default())
            }
            Err(e) => Err(miette::miette!(
                "failed to read remote mapping {}: {}",
                self.path.display(),
                e
            )),
        }
    }
}

/// Requests the loop handles between polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Flip fans between enabled and disabled.
    Toggle,
}

/// Value scheduled for each wind-track event.
///
/// The index identifies the wind-track line, so two consecutive events with
/// the same command are still delivered separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanCommand {
    pub index: Option<usize>,
    pub command: String,
}

impl FanCommand {
    /// The fans-off value active outside any event.
    pub fn off() -> Self {
        Self {
            index: None,
            command: DEFAULT_COMMAND.to_string(),
        }
    }
}

/// Something that can fire fan commands.
#[async_trait]
pub trait Actuator: Send {
    /// Fire a wind-track command; commas separate codes.
    async fn send_commands(&mut self, commands: &str) -> Result<(), LircError>;

    /// Turn the fans off.
    async fn send_off(&mut self) -> Result<(), LircError>;

    /// Select the active IR channels.
    async fn set_transmitters(&mut self, channels: &[u8]) -> Result<(), LircError>;

    /// Drop the connection and, if given, switch to a freshly loaded mapping.
    fn reset(&mut self, mapping: Option<RemoteMapping>);
}

#[async_trait]
impl Actuator for LircClient {
    async fn send_commands(&mut self, commands: &str) -> Result<(), LircError> {
        LircClient::send_commands(self, commands).await
    }

    async fn send_off(&mut self) -> Result<(), LircError> {
        LircClient::send_off(self).await
    }

    async fn set_transmitters(&mut self, channels: &[u8]) -> Result<(), LircError> {
        LircClient::set_transmitters(self, channels).await
    }

    fn reset(&mut self, mapping: Option<RemoteMapping>) {
        self.disconnect();
        if let Some(mapping) = mapping {
            self.set_mapping(mapping);
        }
    }
}

/// State shared between the loop and scheduler deliveries.
struct Shared {
    actuator: Mutex<Box<dyn Actuator>>,
    status: watch::Sender<SyncStatus>,
    enabled: AtomicBool,
}

impl Shared {
    async fn deliver(&self, track: &WindTrack, value: FanCommand) {
        self.status.send_modify(|s| s.current_index = value.index);

        match value.index.and_then(|i| track.events.get(i)) {
            Some(event) => info!(
                position = %format_position(event.position),
                command = %value.command,
                "sent command"
            ),
            None => info!(command = %value.command, "sent command"),
        }

        if !self.enabled.load(Ordering::SeqCst) {
            return;
        }

        let result = {
            let mut actuator = self.actuator.lock().await;
            match value.index {
                Some(_) => actuator.send_commands(&value.command).await,
                None => actuator.send_off().await,
            }
        };
        if let Err(e) = result {
            self.report_transport_error(&e);
        }
    }

    fn report_transport_error(&self, e: &LircError) {
        error!(error = %e, "LIRC command failed");
        let message = match e {
            LircError::Connect { addr, .. } | LircError::ConnectTimeout { addr } => {
                format!("Cannot connect to LIRC at: {}", addr)
            }
            LircError::Send { addr, .. } => format!("Failed sending command to LIRC at: {}", addr),
            other => other.to_string(),
        };
        self.status
            .send_modify(|s| s.error = Some(timestamped(message)));
    }
}

fn delivery(shared: Arc<Shared>, track: Arc<WindTrack>, pacing: Duration) -> Delivery<FanCommand> {
    Arc::new(move |value| {
        let shared = Arc::clone(&shared);
        let track = Arc::clone(&track);
        Box::pin(async move {
            shared.deliver(&track, value).await;
            sleep(pacing).await;
        })
    })
}

/// Polls a player and drives one scheduler per open file.
pub struct SyncLoop<P> {
    player: P,
    config: SyncConfig,
    shared: Arc<Shared>,
    file_name: String,
    track: Option<Arc<WindTrack>>,
    scheduler: Option<Scheduler<FanCommand>>,
}

impl<P: Player> SyncLoop<P> {
    pub fn new(player: P, actuator: Box<dyn Actuator>, config: SyncConfig) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            player,
            config,
            shared: Arc::new(Shared {
                actuator: Mutex::new(actuator),
                status,
                enabled: AtomicBool::new(true),
            }),
            file_name: String::new(),
            track: None,
            scheduler: None,
        }
    }

    /// Watch the published status.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.shared.status.subscribe()
    }

    /// Poll until `shutdown_rx` flips to true, then leave the fans off.
    pub async fn run(
        mut self,
        mut shutdown_rx: watch::Receiver<bool>,
        mut control_rx: mpsc::Receiver<Control>,
    ) {
        self.select_transmitters().await;

        loop {
            self.tick().await;

            tokio::select! {
                biased;

                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }

                Some(control) = control_rx.recv() => match control {
                    Control::Toggle => self.toggle().await,
                },

                _ = sleep(self.config.poll_interval) => {}
            }
        }

        self.shutdown().await;
    }

    /// One poll of the player.
    pub async fn tick(&mut self) {
        let status = match self.player.poll().await {
            Ok(status) => status,
            Err(e) => {
                self.handle_poll_error(e).await;
                return;
            }
        };

        self.shared.status.send_modify(|s| {
            s.playing = status.playing;
            s.position = status.position;
        });

        if status.file_name != self.file_name {
            self.change_file(&status).await;
        }

        if let Some(scheduler) = &self.scheduler {
            if status.playing {
                scheduler.update(status.position);
            } else {
                scheduler.stop();
            }
        }
    }

    /// Enable or disable the fans.
    pub async fn toggle(&mut self) {
        let enabled = !self.shared.enabled.load(Ordering::SeqCst);
        self.shared.enabled.store(enabled, Ordering::SeqCst);
        self.shared.status.send_modify(|s| s.enabled = enabled);

        let result = if enabled {
            info!("fans enabled");
            let status = self.shared.status.borrow().clone();
            let current = self
                .track
                .as_ref()
                .filter(|_| status.playing && self.scheduler.is_some())
                .zip(status.current_index)
                .and_then(|(track, index)| track.events.get(index))
                .map(|event| event.command.clone());

            match current {
                Some(command) => {
                    debug!(command = %command, "resending active command");
                    self.shared
                        .actuator
                        .lock()
                        .await
                        .send_commands(&command)
                        .await
                }
                None => Ok(()),
            }
        } else {
            info!("fans disabled");
            self.shared.actuator.lock().await.send_off().await
        };

        if let Err(e) = result {
            self.shared.report_transport_error(&e);
        }
    }

    /// Dispose the active scheduler, leaving the fans off.
    pub async fn shutdown(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            info!("stopping fans");
            scheduler.dispose(true).await;
        }
    }

    async fn select_transmitters(&self) {
        let result = self
            .shared
            .actuator
            .lock()
            .await
            .set_transmitters(&self.config.channels)
            .await;
        if let Err(e) = result {
            self.shared.report_transport_error(&e);
        }
    }

    async fn change_file(&mut self, status: &PlayerStatus) {
        info!(file = %status.file_name, "media file changed");
        self.file_name = status.file_name.clone();

        let track = self.load_track(status).await;
        if let Some(old) = self.scheduler.take() {
            old.dispose(track.is_none()).await;
        }
        self.track = None;

        self.shared.status.send_modify(|s| {
            s.file_name = status.file_name.clone();
            s.track_loaded = track.is_some();
            s.header = track.as_ref().map(|t| t.header.clone()).unwrap_or_default();
            s.warning = track
                .as_ref()
                .and_then(|t| t.warning.as_ref())
                .map(ToString::to_string);
            s.current_index = None;
        });

        let Some(track) = track else {
            return;
        };

        self.select_transmitters().await;

        let track = Arc::new(track);
        let events: Vec<_> = track
            .events
            .iter()
            .enumerate()
            .map(|(index, event)| {
                (
                    event.position,
                    FanCommand {
                        index: Some(index),
                        command: event.command.clone(),
                    },
                )
            })
            .collect();

        let tolerance = Tolerance::from_resolution(self.player.position_resolution());
        let delivery = delivery(
            Arc::clone(&self.shared),
            Arc::clone(&track),
            self.config.pacing,
        );

        match Scheduler::new(events, FanCommand::off(), tolerance, delivery) {
            Ok(scheduler) => {
                self.scheduler = Some(scheduler);
                self.track = Some(track);
            }
            Err(e) => error!(error = %e, "failed to create scheduler"),
        }
    }

    async fn load_track(&self, status: &PlayerStatus) -> Option<WindTrack> {
        if status.file_name.is_empty() {
            return None;
        }

        let Some(path) =
            windsync_track::locate(&self.config.windtrack_dir, &status.file_dir, &status.file_name)
        else {
            info!(file = %status.file_name, "no wind track for file");
            return None;
        };

        match windsync_track::load(&path, &self.config.offsets).await {
            Ok(track) => {
                if let Some(warning) = &track.warning {
                    warn!(warning = %warning, "wind track loaded with problems");
                }
                Some(track)
            }
            Err(e) => {
                error!(error = %e, "failed to load wind track");
                self.shared
                    .status
                    .send_modify(|s| s.error = Some(timestamped(&e)));
                None
            }
        }
    }

    async fn handle_poll_error(&mut self, e: PlayerError) {
        warn!(error = %e, "player poll failed");

        if let Some(scheduler) = self.scheduler.take() {
            scheduler.dispose(true).await;
        }
        self.track = None;
        self.file_name.clear();
        self.shared.status.send_modify(|s| {
            s.error = Some(timestamped(&e));
            s.file_name.clear();
            s.track_loaded = false;
            s.playing = false;
            s.position = Duration::ZERO;
        });

        let mapping = match &self.config.mapping {
            Some(source) => match source.load().await {
                Ok(mapping) => Some(mapping),
                Err(e) => {
                    warn!(error = %e, "keeping previous remote mapping");
                    None
                }
            },
            None => None,
        };
        self.shared.actuator.lock().await.reset(mapping);
        self.player.reset().await;
    }
}

/// Run the sync loop against MPC and lircd until Ctrl-C.
pub async fn run(config: RunConfig) -> Result<()> {
    let mapping = match &config.sync.mapping {
        Some(source) => source.load().await?,
        None => RemoteMapping::default(),
    };
    let client = LircClient::new(&config.lirc_addr, &config.remote).with_mapping(mapping);
    let player = MpcPlayer::new(&config.mpc_addr);

    info!(
        mpc = %player.base_url(),
        lirc = %client.addr(),
        remote = %config.remote,
        windtracks = %config.sync.windtrack_dir.display(),
        "starting windsync"
    );

    let sync = SyncLoop::new(player, Box::new(client), config.sync);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (control_tx, control_rx) = mpsc::channel(8);

    // Handle shutdown signals
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    #[cfg(unix)]
    spawn_toggle_signal(control_tx)?;
    #[cfg(not(unix))]
    drop(control_tx);

    spawn_status_logger(sync.subscribe());

    sync.run(shutdown_rx, control_rx).await;
    info!("windsync stopped");
    Ok(())
}

/// Toggle fans on `SIGUSR1`.
#[cfg(unix)]
fn spawn_toggle_signal(control_tx: mpsc::Sender<Control>) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut toggles = signal(SignalKind::user_defined1())
        .map_err(|e| miette::miette!("failed to listen for SIGUSR1: {}", e))?;

    tokio::spawn(async move {
        while toggles.recv().await.is_some() {
            info!("received SIGUSR1");
            if control_tx.send(Control::Toggle).await.is_err() {
                break;
            }
        }
    });
    Ok(())
}

/// Log status errors as they change.
fn spawn_status_logger(mut status_rx: watch::Receiver<SyncStatus>) {
    tokio::spawn(async move {
        let mut last_error = None;
        while status_rx.changed().await.is_ok() {
            let error = status_rx.borrow_and_update().error.clone();
            if error != last_error {
                if let Some(message) = &error {
                    warn!(status = %message, "sync status");
                }
                last_error = error;
            }
        }
    });
}

/// Load the remote mapping from `path`, or from the config directory if it
/// exists there.
pub async fn load_mapping(path: Option<&Path>) -> Result<RemoteMapping> {
    match MappingSource::resolve(path) {
        Some(source) => source.load().await,
        None => Ok(RemoteMapping::default()),
    }
}
