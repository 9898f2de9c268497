//! Where the check's log records end up.
//!
//! Standard output belongs to the monitoring system, so the console log goes to stderr. Besides
//! that, every run is recorded in two files next to each other: one with INFO and up, one with
//! everything. Both are opened without locking; concurrent runs against the same host will
//! interleave their lines.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use log::LevelFilter;

#[derive(Debug, Clone, PartialEq)]
pub struct LogFiles {
    pub info: PathBuf,
    pub debug: PathBuf,
}

impl LogFiles {
    /// `<folder>/<name>-<host>.log` and `<folder>/<name>-<host>-debug.log`
    pub fn new(folder: &Path, name: &str, host: &str) -> Self {
        LogFiles {
            info: folder.join(format!("{}-{}.log", name, host)),
            debug: folder.join(format!("{}-{}-debug.log", name, host)),
        }
    }
}

pub fn console_level(verbose: u8, debug: bool) -> LevelFilter {
    match (debug, verbose) {
        (true, _) => LevelFilter::Debug,
        (false, 0) => LevelFilter::Warn,
        (false, 1) => LevelFilter::Info,
        (false, _) => LevelFilter::Debug,
    }
}

fn open(path: &Path, truncate: bool) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true);
    if truncate {
        options.write(true).truncate(true);
    } else {
        options.append(true);
    }
    options.open(path)
}

fn file_format(out: fern::FormatCallback, message: &fmt::Arguments, record: &log::Record) {
    out.finish(format_args!(
        "{} - {} - {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
        record.level(),
        message
    ))
}

/// Keeps the log sinks for the lifetime of a check; dropping it flushes them.
///
/// `std::process::exit()` skips destructors, so the guard has to be gone before it is called.
#[derive(Debug)]
pub struct LogGuard {
    files: LogFiles,
}

impl LogGuard {
    pub fn files(&self) -> &LogFiles {
        &self.files
    }
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        log::logger().flush();
    }
}

/// Install the logger. Can only succeed once per process.
pub fn init(files: LogFiles, console: LevelFilter, truncate: bool) -> Result<LogGuard, fern::InitError> {
    for path in [&files.info, &files.debug].iter() {
        if let Some(folder) = path.parent() {
            fs::create_dir_all(folder)?;
        }
    }
    let info_file = open(&files.info, truncate)?;
    let debug_file = open(&files.debug, truncate)?;

    fern::Dispatch::new()
        .level(LevelFilter::Debug)
        .chain(
            fern::Dispatch::new()
                .level(console)
                .format(|out, message, _| out.finish(format_args!("{}", message)))
                .chain(io::stderr()),
        )
        .chain(
            fern::Dispatch::new()
                .level(LevelFilter::Info)
                .format(file_format)
                .chain(info_file),
        )
        .chain(
            fern::Dispatch::new()
                .level(LevelFilter::Debug)
                .format(file_format)
                .chain(debug_file),
        )
        .apply()?;

    Ok(LogGuard { files })
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::{debug, info};

    #[test]
    fn test_log_file_names() {
        let files = LogFiles::new(Path::new("/var/log/checks"), "sqlline-service-check", "hive01");
        assert_eq!(files.info, PathBuf::from("/var/log/checks/sqlline-service-check-hive01.log"));
        assert_eq!(files.debug, PathBuf::from("/var/log/checks/sqlline-service-check-hive01-debug.log"));
    }

    #[test]
    fn test_console_level() {
        assert_eq!(console_level(0, false), LevelFilter::Warn);
        assert_eq!(console_level(1, false), LevelFilter::Info);
        assert_eq!(console_level(3, false), LevelFilter::Debug);
        assert_eq!(console_level(0, true), LevelFilter::Debug);
    }

    #[test]
    fn test_truncate_or_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("check.log");
        fs::write(&path, "old\n").unwrap();
        {
            use std::io::Write;
            writeln!(open(&path, false).unwrap(), "new").unwrap();
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), "old\nnew\n");
        open(&path, true).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    // The only test allowed to install the process-wide logger.
    #[test]
    fn test_levels_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let files = LogFiles::new(&dir.path().join("nested"), "check", "hive01");
        let guard = init(files.clone(), LevelFilter::Off, true).unwrap();
        info!("visible everywhere");
        debug!("debug file only");
        drop(guard);

        let info_log = fs::read_to_string(&files.info).unwrap();
        let debug_log = fs::read_to_string(&files.debug).unwrap();
        assert!(info_log.contains(" - INFO - visible everywhere"));
        assert!(!info_log.contains("debug file only"));
        assert!(debug_log.contains(" - INFO - visible everywhere"));
        assert!(debug_log.contains(" - DEBUG - debug file only"));
    }
}
