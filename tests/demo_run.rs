//! Integration tests for the `demo run` command.
use mine2farm::cli::RunOpts;
use mine2farm::cli::demo::handle_demo_run_command;
use mine2farm::settings::Settings;
use tempfile::tempdir;

/// An integration test for the `demo run` command.
#[test]
fn test_handle_demo_run_command() {
    unsafe { std::env::set_var("MINE2FARM_LOG_LEVEL", "off") };

    let tempdir = tempdir().unwrap();
    let opts = RunOpts {
        output_dir: Some(tempdir.path().to_path_buf()),
        counter_limit: Some(2),
        ..RunOpts::default()
    };
    handle_demo_run_command("extended", &opts, Some(Settings::default())).unwrap();
    assert!(tempdir.path().join("global.csv").exists());
}
