use chrono::Local;
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub const LOG_DIR: &str = "logs";

/// Where a named log file lands; files always live under `logs/`.
pub fn log_file_path(filename: &str) -> PathBuf {
    Path::new(LOG_DIR).join(filename)
}

/// 0 = info, 1 = debug, 2 or more = trace. `RUST_LOG` still overrides.
pub fn level_for_verbosity(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Installs the global logger. Records go to stderr, or are appended to
/// `logs/<log_file>` when a file name is given.
///
/// # Arguments
///
/// * `verbosity` - Number of `-v` flags given on the command line
/// * `log_file` - Optional file name inside the log directory
pub fn init_logger(verbosity: u8, log_file: Option<&str>) -> Result<()> {
    let mut builder = Builder::new();
    builder
        .filter_level(level_for_verbosity(verbosity))
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        });

    if let Some(filename) = log_file {
        fs::create_dir_all(LOG_DIR)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file_path(filename))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    if builder.try_init().is_err() {
        ::log::debug!("logger already installed, keeping the existing one");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(level_for_verbosity(0), LevelFilter::Info);
        assert_eq!(level_for_verbosity(1), LevelFilter::Debug);
        assert_eq!(level_for_verbosity(5), LevelFilter::Trace);
    }

    #[test]
    fn test_log_files_live_in_log_dir() {
        assert_eq!(log_file_path("run.log"), Path::new("logs").join("run.log"));
    }
}
