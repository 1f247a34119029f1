//! CLI output formatting utilities.

use crate::models::format_timestamp;
use crate::pipeline::ChunkOutcome;
use console::{style, StyledObject};

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        eprintln!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        eprintln!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        eprintln!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        eprintln!("  {}: {}", style(key).dim(), value);
    }

    /// Print a list item.
    pub fn list_item(msg: &str) {
        eprintln!("  {} {}", style("*").cyan(), msg);
    }

    /// Print one line of the per-chunk summary.
    pub fn chunk_line(index: usize, start: f64, end: f64, outcome: ChunkOutcome, segments: usize) {
        eprintln!(
            "  {} chunk {} [{} - {}] {} ({} segments)",
            style("*").cyan(),
            index + 1,
            format_timestamp(start),
            format_timestamp(end),
            outcome_style(outcome),
            segments
        );
    }
}

fn outcome_style(outcome: ChunkOutcome) -> StyledObject<String> {
    let label = outcome.to_string();
    match outcome {
        ChunkOutcome::Translated | ChunkOutcome::Refined => style(label).green(),
        ChunkOutcome::Transcribed | ChunkOutcome::Empty => style(label).yellow(),
        ChunkOutcome::Failed | ChunkOutcome::Cancelled => style(label).red(),
    }
}

/// Format duration in seconds to a human-readable string.
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds.max(0.0) as u32;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}
