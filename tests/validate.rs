//! Integration tests for the `validate` command.
use mine2farm::cli::handle_validate_command;
use mine2farm::log::is_logger_initialised;
use mine2farm::settings::Settings;
use std::path::PathBuf;

/// An integration test for the `validate` command.
///
/// We also check that the logger is initialised after it is run.
#[test]
fn test_handle_validate_command() {
    unsafe { std::env::set_var("MINE2FARM_LOG_LEVEL", "off") };

    assert!(!is_logger_initialised());

    handle_validate_command(&PathBuf::from("demos/extended"), Some(Settings::default())).unwrap();

    assert!(is_logger_initialised());
}
