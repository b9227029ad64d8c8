//! The bundled demo models and the CLI commands for interacting with them.
use super::{RunOpts, handle_run_command};
use crate::settings::Settings;
use anyhow::{Context, Result, bail, ensure};
use clap::Subcommand;
use include_dir::{Dir, DirEntry, include_dir};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// The directory containing the demo models.
const DEMOS_DIR: Dir = include_dir!("demos");

/// The available subcommands for managing demo models.
#[derive(Subcommand)]
pub enum DemoSubcommands {
    /// List available demos.
    List,
    /// Provide information about the specified demo.
    Info {
        /// The name of the demo.
        name: String,
    },
    /// Extract a demo model to a new directory.
    Extract {
        /// The name of the demo to extract.
        name: String,
        /// The destination folder for the demo.
        new_path: Option<PathBuf>,
    },
    /// Run a demo.
    Run {
        /// The name of the demo to run.
        name: String,
        /// Other run options
        #[command(flatten)]
        opts: RunOpts,
    },
}

impl DemoSubcommands {
    /// Execute the supplied demo subcommand
    pub fn execute(self) -> Result<()> {
        match self {
            Self::List => handle_demo_list_command(),
            Self::Info { name } => handle_demo_info_command(&name)?,
            Self::Extract {
                name,
                new_path: dest,
            } => handle_demo_extract_command(&name, dest.as_deref())?,
            Self::Run { name, opts } => handle_demo_run_command(&name, &opts, None)?,
        }

        Ok(())
    }
}

/// Handle the `demo list` command.
fn handle_demo_list_command() {
    for entry in DEMOS_DIR.dirs() {
        println!("{}", entry.path().display());
    }
}

/// Handle the `demo info` command.
fn handle_demo_info_command(name: &str) -> Result<()> {
    let path: PathBuf = [name, "README.txt"].iter().collect();
    let readme = DEMOS_DIR
        .get_file(path)
        .context("Demo not found.")?
        .contents_utf8()
        .context("README.txt is not UTF-8 encoded")?;

    println!("{readme}");

    Ok(())
}

/// Handle the `demo extract` command
fn handle_demo_extract_command(name: &str, dest: Option<&Path>) -> Result<()> {
    let dest = dest.unwrap_or(Path::new(name));
    extract_demo(name, dest)
}

/// Extract the specified demo to a new directory
fn extract_demo(name: &str, new_path: &Path) -> Result<()> {
    let sub_dir = DEMOS_DIR.get_dir(name).context("Demo not found.")?;

    ensure!(
        !new_path.exists(),
        "Destination directory {} already exists",
        new_path.display()
    );

    fs::create_dir(new_path)?;
    for entry in sub_dir.entries() {
        match entry {
            DirEntry::Dir(dir) => bail!(
                "Subdirectories in demos are not supported: {}",
                dir.path().display()
            ),
            DirEntry::File(f) => {
                let file_name = f
                    .path()
                    .file_name()
                    .with_context(|| format!("Invalid demo file {}", f.path().display()))?;
                fs::write(new_path.join(file_name), f.contents())?;
            }
        }
    }

    Ok(())
}

/// Handle the `demo run` command.
pub fn handle_demo_run_command(
    name: &str,
    opts: &RunOpts,
    settings: Option<Settings>,
) -> Result<()> {
    let temp_dir = TempDir::new().context("Failed to create temporary directory.")?;
    let model_path = temp_dir.path().join(name);
    extract_demo(name, &model_path)?;
    handle_run_command(&model_path, opts, settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_demos_are_bundled() {
        let names: Vec<_> = DEMOS_DIR
            .dirs()
            .map(|dir| dir.path().display().to_string())
            .collect();
        assert!(names.contains(&"simple".to_string()));
        assert!(names.contains(&"extended".to_string()));
    }

    #[test]
    fn test_extract_demo() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("simple");
        extract_demo("simple", &dest).unwrap();
        assert!(dest.join("model.toml").exists());
        assert!(dest.join("README.txt").exists());

        // A second extraction would overwrite the first
        assert!(extract_demo("simple", &dest).is_err());
    }

    #[test]
    fn test_unknown_demo() {
        let dir = tempdir().unwrap();
        assert!(extract_demo("nowhere", &dir.path().join("nowhere")).is_err());
    }
}
