//! Command-line flags and the validated configuration they resolve to.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use structopt::StructOpt;
use thiserror::Error;

use crate::{Datum, Max, Min, ParseError, Range};

pub const DEFAULT_LOG_NAME: &str = "sqlline-service-check";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthModeName {
    Kerberos,
    Ssl,
}

#[derive(Debug)]
pub struct InvalidAuthMode {
    err_str: String,
}

impl fmt::Display for InvalidAuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.err_str)
    }
}

impl AuthModeName {
    fn variants() -> [&'static str; 3] {
        ["kerberos", "ssl", "tls"]
    }
}

impl FromStr for AuthModeName {
    type Err = InvalidAuthMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kerberos" | "Kerberos" => Ok(AuthModeName::Kerberos),
            "ssl" | "SSL" | "tls" | "TLS" => Ok(AuthModeName::Ssl),
            _ => Err(InvalidAuthMode { err_str: format!("Invalid authentication mode: '{}'", s) }),
        }
    }
}

#[derive(Debug, StructOpt)]
#[structopt(name = "check_sqlline")]
/// Monitoring plugin that times a query run through `sqlline` against HiveServer2.
///
/// The elapsed seconds sqlline reports for every statement are summed up and compared against the
/// `--warning` and `--critical` ranges, which use the monitoring plugin range syntax:
///   https://www.monitoring-plugins.org/doc/guidelines.html#THRESHOLDFORMAT
pub struct CmdOpts {
    #[structopt(short = "H", long)]
    /// HiveServer2 host. Also used to name the log files.
    pub hostname: String,

    #[structopt(short, long, default_value = "10000")]
    /// HiveServer2 port
    pub port: u16,

    #[structopt(long, default_value = "default")]
    /// Database to `USE` before an inline `--query`
    pub database: String,

    #[structopt(short, long, possible_values = &AuthModeName::variants())]
    /// Authentication mode
    pub mode: AuthModeName,

    #[structopt(short, long)]
    /// Kerberos realm (e.g. DOMAIN.COM); required in kerberos mode
    pub realm: Option<String>,

    #[structopt(long)]
    /// AD server FQDN; required in kerberos mode
    pub adserver: Option<String>,

    #[structopt(long, parse(from_os_str))]
    /// Keytab used to acquire a Kerberos ticket when none is cached
    pub keytab: Option<PathBuf>,

    #[structopt(short, long)]
    /// Principal name in kerberos mode
    pub username: Option<String>,

    #[structopt(long, parse(from_os_str))]
    /// File with the username on its first and the password on its second line; required unless
    /// in kerberos mode
    pub creds: Option<PathBuf>,

    #[structopt(short, long)]
    /// Query to run
    pub query: Option<String>,

    #[structopt(short, long, parse(from_os_str))]
    /// Script file to run instead of `--query`
    pub filename: Option<PathBuf>,

    #[structopt(short, long, value_name = "RANGE")]
    /// Return WARNING if the query time is outside RANGE
    pub warning: Option<String>,

    #[structopt(short, long, value_name = "RANGE")]
    /// Return CRITICAL if the query time is outside RANGE
    pub critical: Option<String>,

    #[structopt(long, default_value = "60", value_name = "SECONDS")]
    /// Maximum reported in the perfdata
    pub max: String,

    #[structopt(short, long, value_name = "SECONDS")]
    /// Kill sqlline when it runs longer than this
    pub timeout: Option<u64>,

    #[structopt(long, default_value = "sqlline", value_name = "PATH")]
    /// sqlline executable to call
    pub sqlline: String,

    #[structopt(long, default_value = "klist", value_name = "PATH")]
    pub klist: String,

    #[structopt(long, default_value = "kinit", value_name = "PATH")]
    pub kinit: String,

    #[structopt(long, parse(from_os_str))]
    /// Log folder [default: $HOME/sqlline-service-check/]
    pub log_folder: Option<PathBuf>,

    #[structopt(long, default_value = DEFAULT_LOG_NAME)]
    /// Log file name prefix
    pub log_name: String,

    #[structopt(long)]
    /// Start both log files afresh instead of appending to them
    pub truncate_logs: bool,

    #[structopt(short, long, parse(from_occurrences))]
    /// Increase console verbosity (use up to 2 times)
    pub verbose: u8,

    #[structopt(long)]
    /// Log everything to the console
    pub debug: bool,
}

impl CmdOpts {
    pub fn log_folder(&self) -> PathBuf {
        match &self.log_folder {
            Some(folder) => folder.clone(),
            None => std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir)
                .join(DEFAULT_LOG_NAME),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot specify both a query and a query file")]
    QueryAndFile,
    #[error("either --query or --filename is required")]
    NoQuery,
    #[error("--{0} is required for kerberos usage")]
    MissingForKerberos(&'static str),
    #[error("credentials file required for non-kerberos use")]
    MissingCredentials,
    #[error("cannot read credentials file '{}': {source}", .path.display())]
    CredentialsUnreadable { path: PathBuf, source: io::Error },
    #[error("credentials file '{}' must hold a username and a password line", .0.display())]
    CredentialsIncomplete(PathBuf),
    #[error("invalid --{flag} threshold: {source}")]
    Threshold { flag: &'static str, source: ParseError },
}

/// Only the fields a mode actually needs are carried by its variant.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthMode {
    Kerberos { realm: String, ad_server: String, keytab: Option<PathBuf> },
    Tls,
}

#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// First line username, second line password. Trailing whitespace is not part of either.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)
            .map_err(|source| ConfigError::CredentialsUnreadable { path: path.to_path_buf(), source })?;
        let mut lines = contents.lines().map(str::trim_end);
        match (lines.next(), lines.next()) {
            (Some(username), Some(password)) if !username.is_empty() => Ok(Credentials {
                username: username.to_string(),
                password: password.to_string(),
            }),
            _ => Err(ConfigError::CredentialsIncomplete(path.to_path_buf())),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptSource {
    Inline(String),
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub database: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    pub warning: Option<Range>,
    pub critical: Option<Range>,
    pub max: Max,
}

impl Thresholds {
    /// An empty range string counts as no threshold at all.
    fn parse_range(flag: &'static str, s: Option<&str>) -> Result<Option<Range>, ConfigError> {
        match s.map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => Range::from_str(s)
                .map(Some)
                .map_err(|source| ConfigError::Threshold { flag, source }),
        }
    }

    pub fn datum(&self, label: &str, value: f64) -> Datum {
        Datum {
            label: label.to_string(),
            value,
            min: Min(0.0),
            max: self.max,
            warn: self.warning,
            crit: self.critical,
        }
    }
}

/// Paths of the external programs the check shells out to.
#[derive(Debug, Clone, PartialEq)]
pub struct Tools {
    pub sqlline: String,
    pub klist: String,
    pub kinit: String,
}

#[derive(Debug, Clone)]
pub struct CheckConfig {
    pub target: Target,
    pub auth: AuthMode,
    pub credentials: Credentials,
    pub script: ScriptSource,
    pub thresholds: Thresholds,
    pub timeout: Option<Duration>,
    pub tools: Tools,
}

impl CheckConfig {
    pub fn from_opts(opts: &CmdOpts) -> Result<Self, ConfigError> {
        let query = opts.query.as_deref().filter(|q| !q.trim().is_empty());
        let script = match (query, &opts.filename) {
            (Some(_), Some(_)) => return Err(ConfigError::QueryAndFile),
            (Some(query), None) => ScriptSource::Inline(query.to_string()),
            (None, Some(filename)) => ScriptSource::File(filename.clone()),
            (None, None) => return Err(ConfigError::NoQuery),
        };

        let (auth, credentials) = match opts.mode {
            AuthModeName::Kerberos => {
                let realm = opts.realm.clone().ok_or(ConfigError::MissingForKerberos("realm"))?;
                let ad_server = opts.adserver.clone().ok_or(ConfigError::MissingForKerberos("adserver"))?;
                let username = opts.username.clone().ok_or(ConfigError::MissingForKerberos("username"))?;
                let auth = AuthMode::Kerberos { realm, ad_server, keytab: opts.keytab.clone() };
                (auth, Credentials { username, password: String::new() })
            }
            AuthModeName::Ssl => {
                let creds = opts.creds.as_ref().ok_or(ConfigError::MissingCredentials)?;
                (AuthMode::Tls, Credentials::from_file(creds)?)
            }
        };

        let thresholds = Thresholds {
            warning: Thresholds::parse_range("warning", opts.warning.as_deref())?,
            critical: Thresholds::parse_range("critical", opts.critical.as_deref())?,
            max: Max::from_str(opts.max.trim())
                .map_err(|source| ConfigError::Threshold { flag: "max", source })?,
        };

        Ok(CheckConfig {
            target: Target {
                host: opts.hostname.clone(),
                port: opts.port,
                database: opts.database.clone(),
            },
            auth,
            credentials,
            script,
            thresholds,
            timeout: opts.timeout.map(Duration::from_secs),
            tools: Tools {
                sqlline: opts.sqlline.clone(),
                klist: opts.klist.clone(),
                kinit: opts.kinit.clone(),
            },
        })
    }
}
