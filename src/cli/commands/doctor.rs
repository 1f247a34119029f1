//! Doctor command - verify system requirements and configuration.

use crate::cli::Output;
use crate::config::{Prompts, Settings};
use console::style;
use std::process::Command;

/// Check result for a single item.
#[derive(Debug)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckResult {
    fn ok(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message: message.to_string(),
            hint: None,
        }
    }

    fn warning(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn error(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn print(&self) {
        let icon = match self.status {
            CheckStatus::Ok => style("✓").green(),
            CheckStatus::Warning => style("!").yellow(),
            CheckStatus::Error => style("✗").red(),
        };

        println!("  {} {} - {}", icon, style(&self.name).bold(), self.message);

        if let Some(hint) = &self.hint {
            println!("    {} {}", style("→").dim(), style(hint).dim());
        }
    }
}

/// Run all diagnostic checks.
pub fn run_doctor(settings: &Settings, config_path: &std::path::Path) -> anyhow::Result<()> {
    Output::header("Tolk Doctor");
    println!();
    println!("Checking system requirements and configuration...\n");

    let mut checks = Vec::new();

    let mut section = |title: &str, results: Vec<CheckResult>| {
        println!("{}", style(title).bold());
        for check in &results {
            check.print();
        }
        println!();
        checks.extend(results);
    };

    section(
        "External Tools",
        vec![
            check_tool("ffmpeg", install_hint_ffmpeg()),
            check_tool("ffprobe", install_hint_ffmpeg()),
        ],
    );
    section("API Configuration", vec![check_openai_api_key()]);
    section("Directories", check_directories(settings));
    section(
        "Configuration",
        vec![
            check_config_file(config_path),
            check_settings(settings),
            check_prompts(settings),
        ],
    );

    let errors = checks.iter().filter(|c| c.status == CheckStatus::Error).count();
    let warnings = checks.iter().filter(|c| c.status == CheckStatus::Warning).count();

    if errors > 0 {
        Output::error(&format!(
            "{} error(s) found. Please fix them before using Tolk.",
            errors
        ));
        std::process::exit(1);
    } else if warnings > 0 {
        Output::warning(&format!("All checks passed with {} warning(s).", warnings));
    } else {
        Output::success("All checks passed! Tolk is ready to use.");
    }

    Ok(())
}

/// Check if an external tool is available.
fn check_tool(name: &str, hint: &str) -> CheckResult {
    match Command::new(name).arg("-version").output() {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .unwrap_or("installed")
                .trim()
                .to_string();
            CheckResult::ok(name, &truncate(&version, 50))
        }
        Ok(_) => CheckResult::error(name, "installed but not working", hint),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            CheckResult::error(name, "not found", hint)
        }
        Err(e) => CheckResult::error(name, &format!("error: {}", e), hint),
    }
}

/// Check if OpenAI API key is configured.
fn check_openai_api_key() -> CheckResult {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if key.starts_with("sk-") && key.len() > 20 => {
            let masked = format!("{}...{}", &key[..7], &key[key.len() - 4..]);
            CheckResult::ok("OPENAI_API_KEY", &format!("configured ({})", masked))
        }
        Ok(key) if key.is_empty() => CheckResult::error(
            "OPENAI_API_KEY",
            "empty",
            "Set with: export OPENAI_API_KEY='sk-...'",
        ),
        Ok(_) => CheckResult::warning(
            "OPENAI_API_KEY",
            "set but format looks unusual",
            "Expected format: sk-... (OpenAI API key)",
        ),
        Err(_) => CheckResult::error(
            "OPENAI_API_KEY",
            "not set",
            "Set with: export OPENAI_API_KEY='sk-...'",
        ),
    }
}

fn check_directories(settings: &Settings) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let temp_dir = settings.temp_dir();
    if temp_dir.exists() {
        results.push(CheckResult::ok("Temp directory", &temp_dir.display().to_string()));
    } else {
        results.push(CheckResult::warning(
            "Temp directory",
            &format!("{} (will be created)", temp_dir.display()),
            "Directory will be created on first run",
        ));
    }

    if let Some(mock_dir) = settings.mock_dir() {
        if mock_dir.is_dir() {
            results.push(CheckResult::ok("Fixture directory", &mock_dir.display().to_string()));
        } else {
            results.push(CheckResult::error(
                "Fixture directory",
                &format!("{} does not exist", mock_dir.display()),
                "Fix debug.mock_dir or pass --mock-dir",
            ));
        }
    }

    if let Some(artifacts) = settings.artifacts_dir() {
        results.push(CheckResult::ok(
            "Artifacts",
            &format!("writing to {}", artifacts.display()),
        ));
    }

    results
}

fn check_config_file(path: &std::path::Path) -> CheckResult {
    if path.exists() {
        CheckResult::ok("Config file", &path.display().to_string())
    } else {
        CheckResult::warning(
            "Config file",
            "using defaults",
            "Create with: tolk config init",
        )
    }
}

fn check_settings(settings: &Settings) -> CheckResult {
    match settings.validate() {
        Ok(()) => CheckResult::ok(
            "Settings",
            &format!(
                "{}s chunks, {} workers",
                settings.chunking.chunk_duration_seconds,
                settings.concurrency.worker_pool_size()
            ),
        ),
        Err(e) => CheckResult::error("Settings", &e.to_string(), "Fix with: tolk config show"),
    }
}

fn check_prompts(settings: &Settings) -> CheckResult {
    let custom = settings.prompts.custom_dir.as_deref();
    match Prompts::load(custom, Some(&settings.prompts.variables)) {
        Ok(_) => CheckResult::ok(
            "Prompts",
            match custom {
                Some(_) => "custom templates loaded",
                None => "built-in templates",
            },
        ),
        Err(e) => CheckResult::error(
            "Prompts",
            &e.to_string(),
            "Check the TOML files in prompts.custom_dir",
        ),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

/// Platform-specific install hint for ffmpeg.
fn install_hint_ffmpeg() -> &'static str {
    if cfg!(target_os = "macos") {
        "Install with: brew install ffmpeg"
    } else if cfg!(target_os = "linux") {
        "Install with: sudo apt install ffmpeg (or your package manager)"
    } else {
        "Install from: https://ffmpeg.org/download.html"
    }
}
