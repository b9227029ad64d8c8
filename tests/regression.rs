//! A regression test for the "simple" demo, whose cost can be worked out by hand.
use float_cmp::assert_approx_eq;
use mine2farm::cli::{RunOpts, handle_run_command};
use mine2farm::settings::Settings;
use std::path::Path;
use tempfile::tempdir;

/// Yearly cost of the simple chain: granulation, phosphoric acid, sulfuric acid, mine and
/// beneficiation, in that order
const YEARLY_OPEX: f64 = 6000.0 + 700.0 + 7000.0 + 840.0 + 1680.0;

/// Capex of the phosphoric acid unit, spent in the first year
const CAPEX: f64 = 300.0;

const WACC: f64 = 0.1;

/// Read the `Cost PV` column of a global results file
fn read_costs(path: &Path) -> Vec<f64> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let column = reader
        .headers()
        .unwrap()
        .iter()
        .position(|header| header == "Cost PV")
        .unwrap();
    reader
        .records()
        .map(|record| record.unwrap()[column].parse().unwrap())
        .collect()
}

#[test]
fn test_regression_simple() {
    unsafe { std::env::set_var("MINE2FARM_LOG_LEVEL", "off") };

    let tempdir = tempdir().unwrap();
    let opts = RunOpts {
        output_dir: Some(tempdir.path().to_path_buf()),
        ..RunOpts::default()
    };
    handle_run_command(Path::new("demos/simple"), &opts, Some(Settings::default())).unwrap();

    let costs = read_costs(&tempdir.path().join("global.csv"));
    assert_eq!(costs.len(), 1);

    let discount: f64 = (0..3).map(|year| (1.0 + WACC).powi(-year)).sum();
    assert_approx_eq!(f64, costs[0], YEARLY_OPEX * discount + CAPEX, epsilon = 1e-3);
}
