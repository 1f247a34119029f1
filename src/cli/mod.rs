//! CLI module for Tolk.

pub mod commands;
mod output;
pub mod preflight;
mod progress;

pub use output::Output;
pub use progress::BarProgress;

use crate::models::PipelineStage;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Tolk - chunked subtitle generation
///
/// Transcribes, refines, aligns and translates the speech in an audio or
/// video file, one chunk at a time. "Tolk" is Norwegian for "interpreter."
#[derive(Parser, Debug)]
#[command(name = "tolk")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate subtitles for a local audio/video file
    Generate {
        /// Path to the audio or video file
        input: PathBuf,

        /// Write the result as JSON to this file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Translate into this language (overrides the config)
        #[arg(short, long)]
        target_language: Option<String>,

        /// Resume from this stage; earlier stages load fixtures or pass through
        #[arg(long)]
        start_stage: Option<PipelineStage>,

        /// Stop every chunk after this stage
        #[arg(long)]
        stop_after: Option<PipelineStage>,

        /// Directory of `<stage>/chunk_<index>.json` fixtures
        #[arg(long)]
        mock_dir: Option<String>,

        /// Hide the progress bar
        #[arg(short, long)]
        quiet: bool,
    },

    /// Check system requirements and configuration
    Doctor,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}
