//! One complete check run, from Kerberos ticket to plugin output.

use std::fmt;
use std::time::Duration;

use log::{error, info, warn};
use thiserror::Error;

use crate::config::{AuthMode, CheckConfig, ConfigError, Thresholds};
use crate::kerberos::{self, KerberosError};
use crate::output::{self, ScanError};
use crate::runner::{ConnectionDescriptor, ExecutionResult, RunError, Sqlline};
use crate::{Datum, ExitCode, ServiceStatus};

/// Prefix of the plugin output line.
pub const CHECK_NAME: &str = "SQLLINE";

/// Perfdata label of the summed up statement time.
pub const LABEL: &str = "query_time";

#[derive(Debug, Error)]
pub enum CheckError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Kerberos(#[from] KerberosError),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("sqlline timed out after {}s without performance data", .0.as_secs())]
    TimedOut(Duration),
    #[error(transparent)]
    Scan(#[from] ScanError),
}

impl CheckError {
    /// Problems with how the plugin was invoked are UNKNOWN; anything that went wrong talking to
    /// the service is CRITICAL.
    pub fn status(&self) -> ServiceStatus {
        match self {
            CheckError::Config(_) | CheckError::Kerberos(KerberosError::NoTicketNoKeytab) => ServiceStatus::Unknown,
            CheckError::Kerberos(_) | CheckError::Run(_) | CheckError::TimedOut(_) | CheckError::Scan(_) => {
                ServiceStatus::Critical
            }
        }
    }
}

/// The plugin's output: a single status line, with perfdata when a query time was measured.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub status: ServiceStatus,
    pub summary: String,
    pub perfdata: Option<Datum>,
}

impl Report {
    pub fn from_metric(thresholds: &Thresholds, seconds: f64) -> Self {
        let datum = thresholds.datum(LABEL, seconds);
        Report {
            status: ServiceStatus::from(&datum),
            summary: datum.simple_status(),
            perfdata: Some(datum),
        }
    }

    pub fn from_error(err: &CheckError) -> Self {
        Report { status: err.status(), summary: err.to_string(), perfdata: None }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} - {}", CHECK_NAME, self.status, self.summary)?;
        if let Some(datum) = &self.perfdata {
            write!(f, " | {}", datum)?;
        }
        Ok(())
    }
}

impl ExitCode for Report {
    fn exit_code(&self) -> i8 {
        self.status.exit_code()
    }
}

#[derive(Debug)]
pub struct Check {
    config: CheckConfig,
}

impl Check {
    pub fn new(config: CheckConfig) -> Self {
        Check { config }
    }

    fn authenticate(&self) -> Result<(), KerberosError> {
        match &self.config.auth {
            AuthMode::Kerberos { realm, keytab, .. } => kerberos::ensure_ticket(
                &self.config.tools,
                &self.config.credentials.username,
                realm,
                keytab.as_deref(),
            ),
            AuthMode::Tls => Ok(()),
        }
    }

    fn execute(&self) -> Result<ExecutionResult, RunError> {
        let connection = ConnectionDescriptor::new(&self.config.target, &self.config.auth);
        info!("Execute sqlline");
        let result = Sqlline::new(&self.config.tools.sqlline, self.config.timeout).run(
            &connection,
            &self.config.script,
            &self.config.target.database,
            &self.config.credentials,
        )?;
        match result.status {
            Some(status) if !status.success() => warn!("sqlline exited with {}", status),
            None => warn!("sqlline could not be reaped"),
            _ => {}
        }
        Ok(result)
    }

    /// The summed up statement time in seconds.
    pub fn run(&self) -> Result<f64, CheckError> {
        self.authenticate()?;
        let result = self.execute()?;

        info!("Analyzing output");
        let seconds = match output::scan(&result.stdout, &result.stderr) {
            Ok(seconds) => seconds,
            Err(ScanError::NoPerformanceData) if result.timed_out => {
                return Err(CheckError::TimedOut(self.config.timeout.unwrap_or_default()))
            }
            Err(err) => return Err(err.into()),
        };
        if result.timed_out {
            warn!("sqlline was killed; reporting the statements it finished");
        }
        info!("Query time: {}", seconds);
        Ok(seconds)
    }

    pub fn report(&self) -> Report {
        match self.run() {
            Ok(seconds) => Report::from_metric(&self.config.thresholds, seconds),
            Err(err) => {
                error!("{}", err);
                Report::from_error(&err)
            }
        }
    }
}
