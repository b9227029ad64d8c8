//! Initialisation of the program logger.
//!
//! Messages go to the console (coloured when attached to a terminal) and, when an output directory
//! is known, to two plain-text log files. The level can be set in `settings.toml` or overridden with
//! the `MINE2FARM_LOG_LEVEL` environment variable.
use anyhow::{Context, Result, bail};
use chrono::Local;
use fern::colors::{Color, ColoredLevelConfig};
use fern::{Dispatch, FormatCallback};
use log::{LevelFilter, Metadata, Record};
use std::env;
use std::fmt::{Arguments, Display};
use std::fs::File;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::OnceLock;

/// Set once the logger is in place
static LOGGER_INIT: OnceLock<()> = OnceLock::new();

/// The environment variable which overrides the configured log level
pub const LOG_LEVEL_ENV_VAR: &str = "MINE2FARM_LOG_LEVEL";

/// The default log level for the program.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Log file for ordinary progress messages
const LOG_INFO_FILE_NAME: &str = "mine2farm_info.log";

/// Log file for warnings and errors
const LOG_ERROR_FILE_NAME: &str = "mine2farm_error.log";

/// Whether the program logger has been initialised
pub fn is_logger_initialised() -> bool {
    LOGGER_INIT.get().is_some()
}

/// Convert a log level name into a [`LevelFilter`]
fn parse_log_level(log_level: &str) -> Result<LevelFilter> {
    let level = match log_level.to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        unknown => bail!("Unknown log level: {unknown}"),
    };

    Ok(level)
}

/// The effective level: environment variable, then settings, then [`DEFAULT_LOG_LEVEL`]
fn effective_level(log_level_from_settings: Option<&str>) -> Result<LevelFilter> {
    match env::var(LOG_LEVEL_ENV_VAR) {
        Ok(level) => parse_log_level(&level),
        Err(_) => parse_log_level(log_level_from_settings.unwrap_or(DEFAULT_LOG_LEVEL)),
    }
}

/// Messages below warnings (info, debug and trace)
fn is_progress(metadata: &Metadata) -> bool {
    metadata.level() > LevelFilter::Warn
}

/// Initialise the program logger.
///
/// # Arguments
///
/// * `log_level_from_settings`: The log level specified in `settings.toml`
/// * `log_dir`: Folder in which to create log files (if any)
pub fn init(log_level_from_settings: Option<&str>, log_dir: Option<&Path>) -> Result<()> {
    if is_logger_initialised() {
        bail!("Logger already initialised");
    }

    let level = effective_level(log_level_from_settings)?;
    let colours = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::Magenta);

    let stdout_colour = std::io::stdout().is_terminal();
    let stderr_colour = std::io::stderr().is_terminal();
    let mut dispatch = Dispatch::new()
        .chain(
            Dispatch::new()
                .filter(is_progress)
                .format(move |out, message, record| {
                    write_log_colour(out, message, record, stdout_colour.then_some(&colours));
                })
                .level(level)
                .chain(std::io::stdout()),
        )
        .chain(
            Dispatch::new()
                .format(move |out, message, record| {
                    write_log_colour(out, message, record, stderr_colour.then_some(&colours));
                })
                .level(level.min(LevelFilter::Warn))
                .chain(std::io::stderr()),
        );

    if let Some(log_dir) = log_dir {
        let progress_log = Dispatch::new()
            .filter(is_progress)
            .level(level.max(LevelFilter::Info));
        let error_log = Dispatch::new().level(LevelFilter::Warn);
        dispatch = dispatch
            .chain(file_dispatch(progress_log, &log_dir.join(LOG_INFO_FILE_NAME))?)
            .chain(file_dispatch(error_log, &log_dir.join(LOG_ERROR_FILE_NAME))?);
    }

    dispatch.apply()?;
    LOGGER_INIT.get_or_init(|| ());

    Ok(())
}

/// Send `dispatch` to a new plain-text file at `path`, truncating any previous log
fn file_dispatch(dispatch: Dispatch, path: &Path) -> Result<Dispatch> {
    let file = File::create(path)
        .with_context(|| format!("Could not create log file {}", path.display()))?;

    Ok(dispatch.format(write_log_plain).chain(file))
}

/// Write a log line as `[HH:MM:SS LEVEL target] message`
fn write_log<T: Display>(out: FormatCallback, level: T, target: &str, message: &Arguments) {
    let timestamp = Local::now().format("%H:%M:%S");

    out.finish(format_args!("[{timestamp} {level} {target}] {message}"));
}

fn write_log_plain(out: FormatCallback, message: &Arguments, record: &Record) {
    write_log(out, record.level(), record.target(), message);
}

/// Write to the log, colouring the level when `colours` are given
fn write_log_colour(
    out: FormatCallback,
    message: &Arguments,
    record: &Record,
    colours: Option<&ColoredLevelConfig>,
) {
    match colours {
        Some(colours) => write_log(out, colours.color(record.level()), record.target(), message),
        None => write_log_plain(out, message, record),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("off", LevelFilter::Off)]
    #[case("WARN", LevelFilter::Warn)]
    #[case("Debug", LevelFilter::Debug)]
    #[case("trace", LevelFilter::Trace)]
    fn test_parse_log_level(#[case] name: &str, #[case] expected: LevelFilter) {
        assert_eq!(parse_log_level(name).unwrap(), expected);
    }

    #[test]
    fn test_parse_log_level_unknown() {
        let err = parse_log_level("chatty").unwrap_err();
        assert_eq!(err.to_string(), "Unknown log level: chatty");
    }
}
