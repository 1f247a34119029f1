//! CLI command implementations.

mod config;
mod doctor;
mod generate;

pub use config::run_config;
pub use doctor::run_doctor;
pub use generate::{run_generate, GenerateOptions};
