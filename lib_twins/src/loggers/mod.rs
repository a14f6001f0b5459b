//! # Loggers
//!
//! Process logging for twins binaries: `log` records go to stdout and to a
//! timestamped file in the configured directory. Older `.log` files are
//! removed at startup so only the newest one survives.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Maps a level name to a filter. Unknown names fall back to `Info`.
pub fn parse_level(log_level: &str) -> log::LevelFilter {
    match log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        "off" => log::LevelFilter::Off,
        _ => log::LevelFilter::Info,
    }
}

/// Builds the dispatch without installing it. Returns the log file path too.
pub fn build_dispatch(app_name: &str, log_dir: &Path, log_level: &str) -> io::Result<(fern::Dispatch, PathBuf)> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }

    // Clean up old log files, keeping only the most recent one
    cleanup_old_logs(log_dir)?;

    let log_file_name = format!("{}_{}.log", app_name, chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"));
    let log_path = log_dir.join(log_file_name);

    let dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(parse_level(log_level))
        .chain(std::io::stdout())
        .chain(fern::log_file(&log_path)?);

    Ok((dispatch, log_path))
}

/// Installs stdout + file logging as the global logger.
pub fn setup_logging(app_name: &str, log_dir: &Path, log_level: &str) -> Result<PathBuf, fern::InitError> {
    let (dispatch, log_path) = build_dispatch(app_name, log_dir, log_level)?;
    dispatch.apply()?;
    Ok(log_path)
}

/// Deletes every `.log` file in `log_dir` except the most recently modified.
pub fn cleanup_old_logs(log_dir: &Path) -> io::Result<usize> {
    let mut entries: Vec<(SystemTime, PathBuf)> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "log"))
        .map(|p| {
            let modified = fs::metadata(&p)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, p)
        })
        .collect();

    // Sort by modification time, newest first
    entries.sort_by(|a, b| b.cmp(a));

    let mut removed = 0;
    for (_, path) in entries.iter().skip(1) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {:?}: {}", path, e),
        }
    }

    Ok(removed)
}
