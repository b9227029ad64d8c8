//! The `settings` subcommands: where the settings file lives and how to change it.
use crate::settings::{Settings, get_settings_file_path};
use anyhow::{Context, Result};
use clap::Subcommand;
use std::fs;
use std::path::Path;

/// Subcommands for settings
#[derive(Subcommand)]
pub enum SettingsSubcommands {
    /// Open the settings file in a text editor, creating it first if needed
    Edit,
    /// Print the path the settings file is read from
    Path,
    /// Print a settings file holding the defaults, commented out
    DumpDefault,
}

impl SettingsSubcommands {
    /// Execute the supplied settings subcommand
    pub fn execute(self) -> Result<()> {
        let file_path = get_settings_file_path();
        match self {
            Self::Edit => {
                if write_placeholder(&file_path)? {
                    println!("Created settings file: {}", file_path.display());
                }
                println!("Opening settings file for editing: {}", file_path.display());
                edit::edit_file(&file_path)
                    .with_context(|| format!("Could not edit {}", file_path.display()))?;
            }
            Self::Path => println!("{}", file_path.display()),
            Self::DumpDefault => print!("{}", Settings::default_file_contents()?),
        }

        Ok(())
    }
}

/// Write the commented default settings to `file_path` unless a file is already there.
///
/// Returns whether a file was written.
fn write_placeholder(file_path: &Path) -> Result<bool> {
    if file_path.is_file() {
        return Ok(false);
    }

    if let Some(dir_path) = file_path.parent() {
        fs::create_dir_all(dir_path)
            .with_context(|| format!("Failed to create directory: {}", dir_path.display()))?;
    }
    fs::write(file_path, Settings::default_file_contents()?)
        .with_context(|| format!("Could not write {}", file_path.display()))?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_placeholder() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("config").join("settings.toml");
        assert!(write_placeholder(&file_path).unwrap());
        assert!(file_path.is_file());

        // An existing file is left alone
        fs::write(&file_path, "log_level = \"warn\"").unwrap();
        assert!(!write_placeholder(&file_path).unwrap());
        assert_eq!(
            fs::read_to_string(&file_path).unwrap(),
            "log_level = \"warn\""
        );
    }
}
