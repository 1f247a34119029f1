//! Tolk - chunked subtitle generation
//!
//! A CLI tool and library that turns the speech in an audio or video file
//! into timed, refined and translated subtitle segments.
//!
//! The name "Tolk" is the Norwegian word for "interpreter."
//!
//! # Overview
//!
//! A run splits the source into chunks and pushes every chunk through the
//! same stages: transcribe, wait for the shared glossary and speaker
//! profiles, refine, align and translate. Chunks run concurrently under
//! per-resource limits, and a failed stage falls back to its input instead
//! of failing the run.
//!
//! # Architecture
//!
//! - `config` - Settings and prompt templates
//! - `audio` - Decoding, on-demand extraction and speech detection
//! - `providers` - Model client traits and the OpenAI implementations
//! - `pipeline` - Steps, gates, reconciliation and the per-chunk processor
//! - `glossary` / `speakers` - Shared background extraction tasks
//! - `orchestrator` - Run coordination and result merging
//! - `usage` / `progress` / `artifacts` - Run observers
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use tolk::config::Settings;
//! use tolk::orchestrator::{Orchestrator, RunHooks};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let orchestrator = Orchestrator::new(settings)?;
//!
//!     let output = orchestrator
//!         .generate(Path::new("talk.mp4"), 0.0, RunHooks::default())
//!         .await?;
//!     println!("Generated {} segments", output.segments.len());
//!
//!     Ok(())
//! }
//! ```

pub mod artifacts;
pub mod audio;
pub mod cli;
pub mod config;
pub mod error;
pub mod glossary;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod providers;
pub mod speakers;
pub mod usage;

pub use error::{Result, TolkError};
