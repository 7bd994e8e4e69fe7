//! windsync: wind-track fan control for home theaters
//!
//! Main binary with subcommands:
//! - `run`: Follow the media player and fire fan commands in sync
//! - `check`: Show how a wind-track file will be scheduled
//! - `send`: Fire one command through LIRC

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use windsync_lirc::LircClient;
use windsync_track::Offsets;

/// Parse boolean from environment variable, accepting common truthy values.
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Accepts "0", "false", "no", "off", "" (case-insensitive) as false.
fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )),
    }
}

mod check;
mod daemon;
mod player;
mod status;

#[derive(Parser)]
#[command(name = "windsync")]
#[command(about = "Synchronize fans to video playback", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Timing adjustments applied when a wind track is built.
#[derive(Args)]
struct OffsetArgs {
    /// Milliseconds subtracted from every timecode
    #[arg(long, env = "WINDSYNC_GLOBAL_OFFSET", default_value = "2500", allow_hyphen_values = true)]
    global_offset: i64,

    /// Extra lead in milliseconds when fans start from off
    #[arg(long, env = "WINDSYNC_SPINUP_OFFSET", default_value = "1500", allow_hyphen_values = true)]
    spinup_offset: i64,

    /// Extra lead in milliseconds when fans switch off
    #[arg(long, env = "WINDSYNC_SPINDOWN_OFFSET", default_value = "0", allow_hyphen_values = true)]
    spindown_offset: i64,

    /// Apply the `Offset: (...)` declared in a wind track's header.
    /// Accepts "1", "true", "yes", or "on".
    #[arg(long, env = "WINDSYNC_SPECIAL_OFFSET", value_parser = parse_bool_env, default_value = "false")]
    special_offset: bool,
}

impl From<OffsetArgs> for Offsets {
    fn from(args: OffsetArgs) -> Self {
        Offsets {
            global_ms: args.global_offset,
            spinup_ms: args.spinup_offset,
            spindown_ms: args.spindown_offset,
            special_enabled: args.special_offset,
        }
    }
}

/// Where to reach lircd.
#[derive(Args)]
struct LircArgs {
    /// LIRC daemon address
    #[arg(long, env = "WINDSYNC_LIRC_ADDR", default_value = "127.0.0.1:8765")]
    lirc_addr: String,

    /// LIRC remote name
    #[arg(long, env = "WINDSYNC_LIRC_REMOTE", default_value = "EHF10127B")]
    remote: String,

    /// File of REMOTE=COMMAND overrides (defaults to lircmapping.txt in the config directory)
    #[arg(long, env = "WINDSYNC_LIRC_MAPPING")]
    mapping: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the media player and drive the fans
    Run {
        /// MPC-HC/MPC-BE web interface address
        #[arg(long, env = "WINDSYNC_MPC_ADDR", default_value = player::DEFAULT_MPC_ADDR)]
        mpc_addr: String,

        #[command(flatten)]
        lirc: LircArgs,

        /// Directory searched first for `<video name>.txt` wind tracks
        #[arg(long, env = "WINDSYNC_WINDTRACK_DIR")]
        windtrack_dir: Option<PathBuf>,

        /// Enabled IR emitter channels (comma-separated, 1-4)
        #[arg(long, env = "WINDSYNC_IR_CHANNELS", value_delimiter = ',', default_value = "1")]
        ir_channels: Vec<u8>,

        /// Player poll interval in milliseconds
        #[arg(long, env = "WINDSYNC_POLL_INTERVAL", default_value = "1000")]
        poll_interval: u64,

        #[command(flatten)]
        offsets: OffsetArgs,
    },

    /// Show how a wind-track file will be scheduled
    Check {
        /// Wind-track file
        #[arg(value_name = "FILE")]
        path: PathBuf,

        #[command(flatten)]
        offsets: OffsetArgs,
    },

    /// Fire a command (e.g. "HIGH" or "LOW,SWING") through LIRC
    Send {
        #[arg(value_name = "COMMAND")]
        command: String,

        #[command(flatten)]
        lirc: LircArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "windsync=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            mpc_addr,
            lirc,
            windtrack_dir,
            ir_channels,
            poll_interval,
            offsets,
        } => {
            let windtrack_dir = match windtrack_dir {
                Some(dir) => dir,
                None => default_windtrack_dir()?,
            };
            daemon::run(daemon::RunConfig {
                mpc_addr,
                lirc_addr: lirc.lirc_addr,
                remote: lirc.remote,
                sync: daemon::SyncConfig {
                    windtrack_dir,
                    offsets: offsets.into(),
                    channels: ir_channels,
                    poll_interval: Duration::from_millis(poll_interval),
                    pacing: daemon::DELIVERY_PACING,
                    mapping: daemon::MappingSource::resolve(lirc.mapping.as_deref()),
                },
            })
            .await
        }

        Commands::Check { path, offsets } => check::run(&path, &offsets.into()).await,

        Commands::Send { command, lirc } => run_send(&command, lirc).await,
    }
}

/// `<data dir>/windsync/windtracks`
fn default_windtrack_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join("windsync").join("windtracks"))
        .ok_or_else(|| miette::miette!("cannot determine data directory; pass --windtrack-dir"))
}

async fn run_send(command: &str, lirc: LircArgs) -> Result<()> {
    let mapping = daemon::load_mapping(lirc.mapping.as_deref()).await?;
    let mut client = LircClient::new(lirc.lirc_addr, lirc.remote).with_mapping(mapping);
    client
        .send_commands(command)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    tracing::info!(command = %command, "sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_env() {
        assert_eq!(parse_bool_env("Yes"), Ok(true));
        assert_eq!(parse_bool_env("0"), Ok(false));
        assert_eq!(parse_bool_env(""), Ok(false));
        assert!(parse_bool_env("maybe").is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["windsync", "check", "Movie.txt"]).unwrap();
        let Commands::Check { path, offsets } = cli.command else {
            panic!("expected check command");
        };
        let offsets: Offsets = offsets.into();

        assert_eq!(path, PathBuf::from("Movie.txt"));
        assert_eq!(offsets, Offsets::default());
    }

    #[test]
    fn test_cli_run_channels() {
        let cli = Cli::try_parse_from([
            "windsync",
            "run",
            "--ir-channels",
            "1,3",
            "--global-offset",
            "-500",
        ])
        .unwrap();
        let Commands::Run {
            ir_channels,
            offsets,
            lirc,
            ..
        } = cli.command
        else {
            panic!("expected run command");
        };

        assert_eq!(ir_channels, vec![1, 3]);
        assert_eq!(offsets.global_offset, -500);
        assert_eq!(lirc.remote, "EHF10127B");
    }
}
