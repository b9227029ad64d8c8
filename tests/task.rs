//! Integration tests for the `task` command.
use mine2farm::cli::handle_task_command;
use mine2farm::settings::Settings;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

#[test]
fn test_handle_task_command() {
    unsafe { std::env::set_var("MINE2FARM_LOG_LEVEL", "off") };

    let tempdir = tempdir().unwrap();
    handle_task_command(
        Path::new("demos/extended"),
        r#"{"cycle": 2, "phase": 1, "db_name": "run1"}"#,
        Some(tempdir.path()),
        Some(Settings::default()),
    )
    .unwrap();

    let history = fs::read_to_string(tempdir.path().join("history.json")).unwrap();
    let history: serde_json::Value = serde_json::from_str(&history).unwrap();
    assert_eq!(history["status"], 0);
    assert_eq!(history["phase"], 1);
    assert_eq!(history["db_name"], "run1");

    let globals = fs::read_to_string(tempdir.path().join("global.batches")).unwrap();
    let lines: Vec<_> = globals.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|line| line.starts_with("TASK ") && line.contains("run1$")));
    assert!(tempdir.path().join("details.batches").exists());
}
