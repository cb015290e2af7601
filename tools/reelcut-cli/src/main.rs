//! Reelcut CLI: inspect timelines, export them with synthetic media and
//! verify the result.
//!
//! Usage:
//!   reelcut inspect <TIMELINE>           Show items, offsets and tracks
//!   reelcut resolve <TIMELINE> --time T  Show what is active at T
//!   reelcut export <TIMELINE> -o OUT     Export to a container file
//!   reelcut analyze <FILE>               Check an export for black/frozen frames
//!   reelcut config                       Print the effective configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

mod commands;

#[derive(Parser)]
#[command(
    name = "reelcut",
    about = "Timeline playback and export engine",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show timeline items, offsets and audio tracks
    Inspect {
        /// Path to the timeline JSON
        path: PathBuf,
    },

    /// Show the active item and audio at a timeline instant
    Resolve {
        /// Path to the timeline JSON
        path: PathBuf,

        /// Timeline time in seconds
        #[arg(short, long)]
        time: f64,
    },

    /// Export a timeline using synthetic media
    Export {
        /// Path to the timeline JSON
        path: PathBuf,

        /// Output file path (defaults next to the timeline)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output frame rate
        #[arg(long)]
        fps: Option<u32>,

        /// Let the engine's clock drive frame capture instead of the fixed pump
        #[arg(long)]
        source_driven: bool,

        /// Skip the encoder/muxer and use the stream recorder
        #[arg(long)]
        recorder: bool,
    },

    /// Analyze an exported file for black or frozen frames
    Analyze {
        /// Path to an exported .rcv or .rcr file
        path: PathBuf,

        /// What to report
        #[arg(long, value_enum, default_value = "summary")]
        mode: AnalyzeMode,

        /// Frames to examine for segment modes
        #[arg(long, value_enum, default_value = "full")]
        scope: AnalyzeScope,

        /// Length of the tail scope in seconds
        #[arg(long, default_value = "2.0")]
        tail_seconds: f64,

        /// Mean luma at or below which a frame is black
        #[arg(long, default_value = "8.0")]
        black_threshold: f64,

        /// Mean frame difference at or below which a frame is frozen
        #[arg(long, default_value = "0.8")]
        freeze_threshold: f64,

        /// Shortest run reported as a segment
        #[arg(long, default_value = "3")]
        min_segment_frames: usize,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AnalyzeMode {
    Summary,
    Black,
    Freeze,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AnalyzeScope {
    Full,
    Tail,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut logging = reelcut_common::config::EngineConfig::load().logging;
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    reelcut_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Inspect { path } => commands::inspect::run(path),
        Commands::Resolve { path, time } => commands::resolve::run(path, time),
        Commands::Export {
            path,
            output,
            fps,
            source_driven,
            recorder,
        } => commands::export::run(path, output, fps, source_driven, recorder).await,
        Commands::Analyze {
            path,
            mode,
            scope,
            tail_seconds,
            black_threshold,
            freeze_threshold,
            min_segment_frames,
        } => commands::analyze::run(
            path,
            mode,
            scope,
            reelcut_export::AnalysisSettings {
                black_threshold,
                freeze_threshold,
                min_segment_frames,
                tail_seconds,
            },
        ),
        Commands::Config => commands::config::run(),
    }
}
