// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use log::Level;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::logging::{LogTarget, SeverityMask};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub logging: LoggingConfig,
    pub selection: SelectionConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Window!".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub clear_color: [f32; 4],
    pub validation_layers: bool,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            validation_layers: cfg!(debug_assertions),
        }
    }
}

/// Diagnostic sink settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// "stdout", "stderr" or "file"
    pub target: String,
    /// Only used when target = "file"
    pub file: PathBuf,
    /// Enabled severities, any subset of trace/debug/info/warn/error, or "all"
    pub severities: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            target: "stdout".to_string(),
            file: PathBuf::from("trigon.log"),
            severities: ["debug", "info", "warn", "error"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl LoggingConfig {
    /// Resolve the sink named by `target`
    pub fn log_target(&self) -> LogTarget {
        match self.target.to_lowercase().as_str() {
            "stdout" => LogTarget::Stdout,
            "stderr" => LogTarget::Stderr,
            "file" => LogTarget::File(self.file.clone()),
            other => {
                // The logger isn't up yet, so this can only go to stderr
                eprintln!("Unknown log target '{}', defaulting to stdout", other);
                LogTarget::Stdout
            }
        }
    }

    pub fn severity_mask(&self) -> SeverityMask {
        SeverityMask::from_names(&self.severities)
    }
}

/// Physical device selection settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Side file whose first line names a preferred GPU (substring match)
    pub override_file: PathBuf,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            override_file: PathBuf::from("preferred_device.txt"),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found.
    ///
    /// Runs before the logger is installed, so problems are returned as
    /// a note for the caller to log once logging is up.
    pub fn load() -> (Self, Option<(Level, String)>) {
        const PATH: &str = "config.toml";

        if !Path::new(PATH).exists() {
            let note = format!("{} not found, using defaults", PATH);
            return (Config::default(), Some((Level::Info, note)));
        }

        match Self::load_from_path(PATH) {
            Ok(config) => (config, None),
            Err(e) => (
                Config::default(),
                Some((Level::Warn, format!("Failed to load {}: {:#}. Using defaults.", PATH, e))),
            ),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.selection.override_file, PathBuf::from("preferred_device.txt"));
        assert_eq!(config.logging.log_target(), LogTarget::Stdout);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [window]
            title = "triangle"

            [logging]
            target = "file"
            file = "out.log"
            severities = ["warn", "error"]
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "triangle");
        assert_eq!(config.window.width, 800);
        assert_eq!(config.logging.log_target(), LogTarget::File(PathBuf::from("out.log")));

        let mask = config.logging.severity_mask();
        assert!(mask.contains(Level::Error));
        assert!(mask.contains(Level::Warn));
        assert!(!mask.contains(Level::Info));
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(Config::parse("[window\nwidth = ").is_err());
    }
}
