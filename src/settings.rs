//! Code for loading program settings.
use crate::get_mine2farm_config_dir;
use crate::input::read_toml;
use crate::log::DEFAULT_LOG_LEVEL;
use anyhow::{Context, Result, anyhow, ensure};
use documented::DocumentedFields;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::{Path, PathBuf};

const SETTINGS_FILE_NAME: &str = "settings.toml";

const DEFAULT_SETTINGS_FILE_HEADER: &str = "# This file contains the program settings for mine2farm.
# Uncomment a line to override its default value.
";

/// Default log level for program
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

/// Default number of serialised records per published batch
fn default_results_batch_size() -> usize {
    25
}

/// Default number of scenarios between progress snapshots
fn default_progress_step() -> usize {
    1
}

/// Get the path to where the settings file will be read from
pub fn get_settings_file_path() -> PathBuf {
    let mut path = get_mine2farm_config_dir();
    path.push(SETTINGS_FILE_NAME);

    path
}

/// Program settings from config file
#[derive(Debug, DocumentedFields, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// The default program log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Whether to overwrite output files by default
    #[serde(default)]
    pub overwrite: bool,
    /// Number of serialised records sent per batch by the `task` command
    #[serde(default = "default_results_batch_size")]
    pub results_batch_size: usize,
    /// Number of evaluated scenarios between two progress snapshots
    #[serde(default = "default_progress_step")]
    pub progress_step: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            overwrite: false,
            results_batch_size: default_results_batch_size(),
            progress_step: default_progress_step(),
        }
    }
}

impl Settings {
    /// Read the program settings file, falling back on defaults if it is not present
    pub fn load() -> Result<Settings> {
        Self::load_from_path(&get_settings_file_path())
    }

    /// Read settings from the specified path
    fn load_from_path(file_path: &Path) -> Result<Settings> {
        if !file_path.is_file() {
            return Ok(Settings::default());
        }

        let settings: Settings = read_toml(file_path)?;
        settings.validate()?;

        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.results_batch_size > 0,
            "results_batch_size must be greater than zero"
        );
        ensure!(self.progress_step > 0, "progress_step must be greater than zero");

        Ok(())
    }

    /// A settings file with every field commented out and documented.
    ///
    /// Each field is preceded by its doc comment, so users can see what they are overriding.
    pub fn default_file_contents() -> Result<String> {
        let defaults = toml::to_string(&Settings::default())
            .context("Could not convert default settings to TOML")?;

        let mut out = DEFAULT_SETTINGS_FILE_HEADER.to_string();
        for line in defaults.lines() {
            let Some((field, _)) = line.split_once('=') else {
                continue;
            };
            let docs = Settings::get_field_docs(field.trim())
                .map_err(|_| anyhow!("Missing documentation for setting {}", field.trim()))?;
            for doc in docs.lines() {
                writeln!(out, "\n# # {}", doc.trim())?;
            }
            writeln!(out, "# {}", line.trim())?;
        }

        Ok(out)
    }
}
