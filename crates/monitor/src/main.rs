//! Drowsiness Monitor - Main Entry Point

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use drowsiness_monitor::{init_logging, prepare_audio, run, Settings};
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "drowsiness-monitor",
    version,
    about = "Driver drowsiness detection with spoken alerts"
)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    config: PathBuf,

    /// Camera device index (overrides camera.device_id)
    #[arg(long)]
    camera: Option<i32>,

    /// Replay a directory of still images instead of opening a camera
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Log filter such as `debug` or `dms=trace,info` (overrides logging.level)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Render the spoken alert clips and exit
    PrepareAudio,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::load(&cli.config) {
        Ok(settings) => settings.with_camera(cli.camera),
        Err(e) => {
            eprintln!("Error loading {}: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let filter = cli.log_level.as_deref().unwrap_or(&settings.logging.level);
    init_logging(filter, settings.logging.json);
    info!("=== Drowsiness Monitor v{} ===", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Some(Command::PrepareAudio) => prepare_audio(&settings).map(|_| ()),
        None => run(&settings, cli.replay.as_deref()).await.map(|summary| {
            info!(
                frames = summary.frames,
                no_face_frames = summary.no_face_frames,
                dropped_frames = summary.dropped_frames,
                alerts = ?summary.alerts,
                "Run complete"
            );
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
