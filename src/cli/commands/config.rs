//! Config command implementation.

use crate::cli::{ConfigAction, Output};
use crate::config::Settings;
use anyhow::Result;
use std::path::Path;

/// Run the config command.
pub fn run_config(action: &ConfigAction, settings: Settings, config_path: &Path) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(&settings)
                .map_err(|e| anyhow::anyhow!("Failed to serialize config: {}", e))?;
            println!("{}", toml_str);
        }

        ConfigAction::Path => {
            println!("{}", config_path.display());
        }

        ConfigAction::Init { force } => {
            if config_path.exists() && !force {
                Output::warning(&format!(
                    "Config already exists at {}. Use --force to overwrite.",
                    config_path.display()
                ));
                return Ok(());
            }
            Settings::default().save_to(&config_path.to_path_buf())?;
            Output::success(&format!("Wrote default config to {}", config_path.display()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_loadable_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tolk").join("config.toml");

        run_config(&ConfigAction::Init { force: false }, Settings::default(), &path).unwrap();
        let loaded = Settings::load_from(Some(&path)).unwrap();
        assert_eq!(
            loaded.chunking.chunk_duration_seconds,
            Settings::default().chunking.chunk_duration_seconds
        );
    }

    #[test]
    fn test_init_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[translation]\ntarget_language = \"German\"\n").unwrap();

        run_config(&ConfigAction::Init { force: false }, Settings::default(), &path).unwrap();
        let loaded = Settings::load_from(Some(&path)).unwrap();
        assert_eq!(loaded.translation.target_language, "German");
    }
}
