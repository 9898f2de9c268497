//! Scraping the elapsed time out of sqlline's console output.
//!
//! sqlline reports every statement it ran with a line like
//!
//! ```text
//! 12 rows selected (3.21 seconds)
//! 1 row selected (0.5 seconds)
//! No rows affected (0.084 seconds)
//! ```
//!
//! Everything this plugin knows about that format lives in this module: the timing pattern and
//! the driver exceptions that mean the connection itself failed. If a sqlline or Hive JDBC driver
//! upgrade changes its wording, this is the one place to follow it.

use log::{debug, error};
use regex::Regex;
use thiserror::Error;

/// Exceptions of the Hive JDBC driver that abort the check as soon as they appear on stderr.
pub const FATAL_MARKERS: [&str; 2] = [
    "javax.naming.AuthenticationException",
    "com.simba.hiveserver2.support.exceptions.GeneralException",
];

#[derive(Debug, Error, PartialEq)]
pub enum ScanError {
    #[error("{marker}: {message}")]
    Fatal { marker: &'static str, message: String },
    #[error("no performance data gathered")]
    NoPerformanceData,
}

/// The seconds reported on a statement summary line, if `line` is one.
pub fn elapsed_seconds(line: &str) -> Option<f64> {
    lazy_static! {
        static ref RE: Regex = Regex::new(r"(?x)
            (?:No\x20rows\x20affected|rows?\x20selected)
            \x20\(
            (?P<seconds>[0-9]+(?:\.[0-9]+)?)
            \x20seconds\)
        ").unwrap();
    }
    RE.captures(line)?.name("seconds")?.as_str().parse().ok()
}

pub fn fatal_marker(line: &str) -> Option<&'static str> {
    FATAL_MARKERS.iter().copied().find(|marker| line.contains(marker))
}

/// The driver tends to bury the useful part of its message after the last `FAILED`.
fn failure_message(line: &str) -> String {
    let tail = match line.rfind("FAILED") {
        Some(idx) => line[idx + "FAILED".len()..].trim_start_matches(':').trim(),
        None => "",
    };
    if tail.is_empty() {
        line.trim().to_string()
    } else {
        tail.to_string()
    }
}

/// Sum up the elapsed time of every statement reported in `stdout` and `stderr`, in that order.
///
/// A fatal marker on stderr ends the scan immediately, discarding anything summed up so far. A
/// total of exactly zero is indistinguishable from sqlline never getting to run a statement and is
/// reported as [`ScanError::NoPerformanceData`].
pub fn scan(stdout: &str, stderr: &str) -> Result<f64, ScanError> {
    let mut total = 0.0;

    debug!("...checking stdout");
    for line in stdout.lines() {
        debug!("{}", line);
        if let Some(seconds) = elapsed_seconds(line) {
            total += seconds;
        }
    }

    debug!("...checking stderr");
    for line in stderr.lines() {
        debug!("{}", line);
        if let Some(marker) = fatal_marker(line) {
            let message = failure_message(line);
            error!("{}", message);
            return Err(ScanError::Fatal { marker, message });
        }
        if let Some(seconds) = elapsed_seconds(line) {
            total += seconds;
        }
    }

    debug!("Total runtime: {}", total);
    if total == 0.0 {
        return Err(ScanError::NoPerformanceData);
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: &str = "\
Connecting to jdbc:hive2://hive.example.com:10000/;ssl=1;AuthMech=3
Connected to: Apache Hive (version 2.1.1-cdh6.3.2)
Driver: Hive JDBC (version 2.6.5)
Transaction isolation: TRANSACTION_REPEATABLE_READ
0: jdbc:hive2://hive.example.com:10000/> USE default;
No rows affected (0.084 seconds)
0: jdbc:hive2://hive.example.com:10000/> select count(*) from orders;
12 rows selected (3.21 seconds)
Closing: 0: jdbc:hive2://hive.example.com:10000/;ssl=1;AuthMech=3
";

    #[test]
    fn test_elapsed_seconds() {
        assert_eq!(elapsed_seconds("12 rows selected (3.21 seconds)"), Some(3.21));
        assert_eq!(elapsed_seconds("1 row selected (0.5 seconds)"), Some(0.5));
        assert_eq!(elapsed_seconds("No rows selected (7 seconds)"), Some(7.0));
        assert_eq!(elapsed_seconds("No rows affected (0.084 seconds)"), Some(0.084));
        assert_eq!(elapsed_seconds("INFO  : No rows affected (1.5 seconds) "), Some(1.5));
    }

    #[test]
    fn test_elapsed_seconds_ignores_other_lines() {
        assert_eq!(elapsed_seconds("Connected to: Apache Hive (version 2.1.1)"), None);
        assert_eq!(elapsed_seconds("12 rows selected"), None);
        assert_eq!(elapsed_seconds("12 rows selected (slow seconds)"), None);
        assert_eq!(elapsed_seconds("| 3.21 seconds |"), None);
    }

    #[test]
    fn test_single_statement() {
        assert_eq!(scan("", "42 rows selected (2.5 seconds)\n"), Ok(2.5));
    }

    #[test]
    fn test_statements_are_summed() {
        assert_eq!(scan("3 rows selected (1.5 seconds)\n", "No rows affected (2.25 seconds)\n"), Ok(3.75));
        assert_eq!(scan("", "3 rows selected (1.5 seconds)\nNo rows affected (2.25 seconds)\n"), Ok(3.75));
    }

    #[test]
    fn test_realistic_session() {
        let total = scan("", SESSION).unwrap();
        assert!((total - 3.294).abs() < 1e-9);
    }

    #[test]
    fn test_noise_only() {
        assert_eq!(scan("+------+\n| _c0  |\n+------+\n", "Connecting to jdbc:hive2://x\n"), Err(ScanError::NoPerformanceData));
        assert_eq!(scan("", ""), Err(ScanError::NoPerformanceData));
    }

    #[test]
    fn test_zero_total_is_no_data() {
        assert_eq!(scan("No rows affected (0.0 seconds)\n", ""), Err(ScanError::NoPerformanceData));
    }

    #[test]
    fn test_fatal_marker_wins_over_timings() {
        let stderr = "\
No rows affected (0.084 seconds)
Error: [Simba][HiveJDBCDriver](500593) Communication link failure. Reason: javax.naming.AuthenticationException: FAILED: invalid credentials
12 rows selected (3.21 seconds)
";
        assert_eq!(
            scan("1 row selected (1.0 seconds)\n", stderr),
            Err(ScanError::Fatal {
                marker: "javax.naming.AuthenticationException",
                message: String::from("invalid credentials"),
            })
        );
    }

    #[test]
    fn test_general_exception() {
        let stderr = "Error: com.simba.hiveserver2.support.exceptions.GeneralException: connection refused\n";
        match scan("", stderr) {
            Err(ScanError::Fatal { marker, message }) => {
                assert_eq!(marker, FATAL_MARKERS[1]);
                assert_eq!(message, stderr.trim());
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_fatal_marker_on_stdout_is_not_fatal() {
        let stdout = "select 'javax.naming.AuthenticationException';\n1 row selected (0.25 seconds)\n";
        assert_eq!(scan(stdout, ""), Ok(0.25));
    }
}
