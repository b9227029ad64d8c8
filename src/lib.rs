//! Scenario enumeration and valuation for a phosphate mine-to-farm supply chain.
//!
//! The engine enumerates structurally valid combinations of facility options (mines, beneficiation
//! plants, sulfuric and phosphoric acid units, granulation units and logistics links), propagates
//! demand upstream through each combination and prices it as a net present cost.
#![warn(missing_docs)]
use std::path::PathBuf;

pub mod cli;
pub mod entity;
pub mod error;
pub mod finance;
pub mod graph;
pub mod id;
pub mod input;
pub mod layer;
pub mod log;
pub mod market;
pub mod model;
pub mod optimisation;
pub mod output;
pub mod risk;
pub mod scenario;
pub mod series;
pub mod settings;
pub mod simulation;
pub mod units;
pub mod worker;
pub mod year;

#[cfg(test)]
mod fixture;

/// Get the path to the directory holding program-wide configuration files
pub fn get_mine2farm_config_dir() -> PathBuf {
    let Some(mut config_dir) = dirs::config_dir() else {
        // No config dir on this platform, so fall back on the current directory
        return PathBuf::new();
    };

    config_dir.push("mine2farm");
    config_dir
}
