//! The `metadata.toml` file written next to the results of a run.
//!
//! It records how the scenarios were valued (model, discount rate, phase partition) and which
//! build of the program on which machine did it, so that a results folder can be traced back.
use crate::simulation::SimulateOptions;
use anyhow::{Context, Result};
use chrono::Local;
use platform_info::{PlatformInfo, PlatformInfoAPI, UNameAPI};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// The output file name for metadata
const METADATA_FILE_NAME: &str = "metadata.toml";

/// Information about the program build via `built` crate
mod built_info {
    // The file has been placed there by the build script.
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Short git hash of the build, with `-dirty` appended for uncommitted changes
fn build_revision() -> String {
    match (built_info::GIT_COMMIT_HASH_SHORT, built_info::GIT_DIRTY) {
        (Some(hash), Some(true)) => format!("{hash}-dirty"),
        (Some(hash), _) => hash.to_string(),
        (None, _) => "unknown".to_string(),
    }
}

#[derive(Serialize)]
struct Metadata<'a> {
    run: RunSection<'a>,
    program: ProgramSection,
    platform: PlatformSection,
}

/// How the scenarios of this folder were valued
#[derive(Serialize)]
struct RunSection<'a> {
    model_path: &'a Path,
    started: String,
    wacc: f64,
    cycle: usize,
    phase: usize,
    logistics_lp: bool,
    counter_limit: Option<usize>,
}

#[derive(Serialize)]
struct ProgramSection {
    name: &'static str,
    version: &'static str,
    revision: String,
    target: &'static str,
    debug_build: bool,
    rustc_version: &'static str,
    built_utc: &'static str,
}

impl ProgramSection {
    fn current() -> Self {
        Self {
            name: built_info::PKG_NAME,
            version: built_info::PKG_VERSION,
            revision: build_revision(),
            target: built_info::TARGET,
            debug_build: built_info::DEBUG,
            rustc_version: built_info::RUSTC_VERSION,
            built_utc: built_info::BUILT_TIME_UTC,
        }
    }
}

/// The machine the engine ran on, from [`PlatformInfo`]
#[derive(Serialize)]
struct PlatformSection {
    os: String,
    kernel: String,
    machine: String,
    host: String,
}

impl PlatformSection {
    fn current() -> Result<Self> {
        let info = PlatformInfo::new()
            .ok()
            .context("Unable to determine platform info")?;

        Ok(Self {
            os: info.osname().to_string_lossy().into(),
            kernel: format!(
                "{} {}",
                info.sysname().to_string_lossy(),
                info.release().to_string_lossy()
            ),
            machine: info.machine().to_string_lossy().into(),
            host: info.nodename().to_string_lossy().into(),
        })
    }
}

/// Write `metadata.toml` to `output_path` for a run of the model at `model_path`
pub fn write_metadata(
    output_path: &Path,
    model_path: &Path,
    wacc: f64,
    options: &SimulateOptions,
) -> Result<()> {
    let metadata = Metadata {
        run: RunSection {
            model_path,
            started: Local::now().to_rfc2822(),
            wacc,
            cycle: options.cycle,
            phase: options.phase,
            logistics_lp: options.logistics_lp,
            counter_limit: options.counter_limit,
        },
        program: ProgramSection::current(),
        platform: PlatformSection::current()?,
    };
    let file_path = output_path.join(METADATA_FILE_NAME);
    fs::write(&file_path, toml::to_string(&metadata)?)
        .with_context(|| format!("Could not write {}", file_path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_metadata() {
        let dir = tempdir().unwrap();
        let options = SimulateOptions {
            cycle: 2,
            phase: 1,
            ..SimulateOptions::default()
        };
        write_metadata(dir.path(), Path::new("demos/simple"), 0.08, &options).unwrap();

        let contents = fs::read_to_string(dir.path().join(METADATA_FILE_NAME)).unwrap();
        let metadata: toml::Table = toml::from_str(&contents).unwrap();
        assert_eq!(metadata["run"]["phase"].as_integer(), Some(1));
        assert_eq!(metadata["run"]["wacc"].as_float(), Some(0.08));
        assert!(!metadata["run"].as_table().unwrap().contains_key("counter_limit"));
        assert_eq!(metadata["program"]["name"].as_str(), Some("mine2farm"));
    }
}
