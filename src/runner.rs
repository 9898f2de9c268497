//! Launching sqlline and capturing what it prints.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use tempfile::NamedTempFile;
use thiserror::Error;
use wait_timeout::ChildExt;

use crate::config::{AuthMode, Credentials, ScriptSource, Target};

/// Without a terminal, the jline console of sqlline may hang unless told not to use one.
const CLIENT_OPTS: (&str, &str) = ("HADOOP_CLIENT_OPTS", "-Djline.terminal=jline.UnsupportedTerminal");

/// How long output is still collected after a timed out child was killed.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// The JDBC URL handed to sqlline via `-u`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor(String);

impl ConnectionDescriptor {
    pub fn new(target: &Target, auth: &AuthMode) -> Self {
        let base = format!("jdbc:hive2://{}:{}/", target.host, target.port);
        let url = match auth {
            AuthMode::Kerberos { realm, ad_server, .. } => format!(
                "{base};AuthMech=1;KrbHostFQDN={ad};KrbServiceName=hive;KrbHostFQDN={host};KrbRealm={realm}",
                base = base, ad = ad_server, host = target.host, realm = realm
            ),
            AuthMode::Tls => format!("{};ssl=1;AuthMech=3", base),
        };
        ConnectionDescriptor(url)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// sqlline has no option to execute a query given on its command line, so inline queries are
/// written to a script first.
pub fn inline_script(database: &str, query: &str) -> String {
    let query = query.trim().trim_end_matches(';').trim_end();
    format!("USE {};\n{};\n", database, query)
}

/// The script passed to sqlline via `-f`. A temporary script is removed when this is dropped; a
/// user supplied one is left alone.
#[derive(Debug)]
pub enum ScriptFile {
    Temporary(NamedTempFile),
    Existing(PathBuf),
}

impl ScriptFile {
    pub fn prepare(source: &ScriptSource, database: &str) -> io::Result<Self> {
        match source {
            ScriptSource::File(path) => Ok(ScriptFile::Existing(path.clone())),
            ScriptSource::Inline(query) => {
                let mut file = tempfile::Builder::new()
                    .prefix("sqlline-check-")
                    .suffix(".sql")
                    .tempfile()?;
                file.write_all(inline_script(database, query).as_bytes())?;
                file.flush()?;
                Ok(ScriptFile::Temporary(file))
            }
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            ScriptFile::Temporary(file) => file.path(),
            ScriptFile::Existing(path) => path,
        }
    }
}

/// What sqlline left behind. `status` is `None` only if a killed child could not be reaped.
#[derive(Debug, Default)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub status: Option<ExitStatus>,
    pub timed_out: bool,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("cannot write the query script: {0}")]
    Script(#[source] io::Error),
    #[error("failed to run '{program}': {source}")]
    Launch { program: String, source: io::Error },
}

#[derive(Debug, Clone)]
pub struct Sqlline {
    program: String,
    timeout: Option<Duration>,
}

impl Sqlline {
    pub fn new(program: &str, timeout: Option<Duration>) -> Self {
        Sqlline { program: program.to_string(), timeout }
    }

    pub fn command(&self, connection: &ConnectionDescriptor, script: &Path, credentials: &Credentials) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("-u")
            .arg(connection.as_str())
            .arg("-f")
            .arg(script)
            .arg("-n")
            .arg(&credentials.username)
            .arg("-p")
            .arg(&credentials.password)
            .env(CLIENT_OPTS.0, CLIENT_OPTS.1);
        command
    }

    pub fn run(
        &self,
        connection: &ConnectionDescriptor,
        source: &ScriptSource,
        database: &str,
        credentials: &Credentials,
    ) -> Result<ExecutionResult, RunError> {
        let script = ScriptFile::prepare(source, database).map_err(RunError::Script)?;
        debug!(
            "Running {} -u {} -f {} -n {} -p ********",
            self.program,
            connection,
            script.path().display(),
            credentials.username
        );
        let command = self.command(connection, script.path(), credentials);
        let result = capture(command, self.timeout)
            .map_err(|source| RunError::Launch { program: self.program.clone(), source })?;
        if let ScriptFile::Temporary(file) = &script {
            debug!("Removing {}", file.path().display());
        }
        Ok(result)
    }
}

fn spawn_reader<R: Read + Send + 'static>(stream: R) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if tx.send(String::from_utf8_lossy(&line).into_owned()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

/// Without a deadline this blocks until the stream is closed.
fn collect(rx: Option<Receiver<String>>, deadline: Option<Instant>) -> String {
    let mut text = String::new();
    let rx = match rx {
        Some(rx) => rx,
        None => return text,
    };
    match deadline {
        None => rx.iter().for_each(|chunk| text.push_str(&chunk)),
        Some(deadline) => {
            while let Ok(chunk) = rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                text.push_str(&chunk);
            }
        }
    }
    text
}

/// Run `command` to completion (or until `timeout`) and capture both output streams.
///
/// Both pipes are read on their own threads while the child runs, so a chatty child never blocks
/// on a full pipe. When the timeout expires the child is killed and whatever it managed to write
/// is still collected for a short grace period.
pub fn capture(mut command: Command, timeout: Option<Duration>) -> io::Result<ExecutionResult> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);

    let (status, timed_out) = match timeout {
        None => (Some(child.wait()?), false),
        Some(timeout) => match child.wait_timeout(timeout)? {
            Some(status) => (Some(status), false),
            None => {
                warn!("Process {} did not finish within {:?}, killing it", child.id(), timeout);
                if let Err(err) = child.kill() {
                    debug!("Kill failed: {}", err);
                }
                (child.wait().ok(), true)
            }
        },
    };

    let deadline = if timed_out { Some(Instant::now() + DRAIN_GRACE) } else { None };
    Ok(ExecutionResult {
        stdout: collect(stdout, deadline),
        stderr: collect(stderr, deadline),
        status,
        timed_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn target() -> Target {
        Target { host: String::from("hive.example.com"), port: 10000, database: String::from("default") }
    }

    fn credentials() -> Credentials {
        Credentials { username: String::from("monitor"), password: String::from("s3cr3t") }
    }

    #[test]
    fn test_kerberos_connection_string() {
        let auth = AuthMode::Kerberos {
            realm: String::from("EXAMPLE.COM"),
            ad_server: String::from("ad.example.com"),
            keytab: None,
        };
        assert_eq!(
            ConnectionDescriptor::new(&target(), &auth).as_str(),
            "jdbc:hive2://hive.example.com:10000/;AuthMech=1;KrbHostFQDN=ad.example.com;\
             KrbServiceName=hive;KrbHostFQDN=hive.example.com;KrbRealm=EXAMPLE.COM"
        );
    }

    #[test]
    fn test_tls_connection_string() {
        assert_eq!(
            ConnectionDescriptor::new(&target(), &AuthMode::Tls).to_string(),
            "jdbc:hive2://hive.example.com:10000/;ssl=1;AuthMech=3"
        );
    }

    #[test]
    fn test_inline_script() {
        assert_eq!(inline_script("default", "select 1"), "USE default;\nselect 1;\n");
        assert_eq!(inline_script("sales", " select count(*) from orders; \n"), "USE sales;\nselect count(*) from orders;\n");
    }

    #[test]
    fn test_temporary_script_is_removed_on_drop() {
        let script = ScriptFile::prepare(&ScriptSource::Inline(String::from("select 1")), "default").unwrap();
        let path = script.path().to_path_buf();
        assert_eq!(fs::read_to_string(&path).unwrap(), "USE default;\nselect 1;\n");
        drop(script);
        assert!(!path.exists());
    }

    #[test]
    fn test_existing_script_is_passed_through() {
        let script = ScriptFile::prepare(&ScriptSource::File(PathBuf::from("/srv/q.hql")), "default").unwrap();
        assert_eq!(script.path(), Path::new("/srv/q.hql"));
    }

    #[test]
    fn test_command_line_shape() {
        let sqlline = Sqlline::new("echo", None);
        let connection = ConnectionDescriptor::new(&target(), &AuthMode::Tls);
        let result = sqlline
            .run(&connection, &ScriptSource::File(PathBuf::from("/srv/q.hql")), "default", &credentials())
            .unwrap();
        assert_eq!(
            result.stdout,
            "-u jdbc:hive2://hive.example.com:10000/;ssl=1;AuthMech=3 -f /srv/q.hql -n monitor -p s3cr3t\n"
        );
        assert!(result.status.unwrap().success());
        assert!(!result.timed_out);
    }

    #[test]
    fn test_capture_both_streams() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("echo out1; echo err1 >&2; echo out2; exit 3");
        let result = capture(command, Some(Duration::from_secs(10))).unwrap();
        assert_eq!(result.stdout, "out1\nout2\n");
        assert_eq!(result.stderr, "err1\n");
        assert_eq!(result.status.unwrap().code(), Some(3));
        assert!(!result.timed_out);
    }

    #[test]
    fn test_capture_timeout_keeps_partial_output() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("echo started; exec sleep 30");
        let started = Instant::now();
        let result = capture(command, Some(Duration::from_millis(300))).unwrap();
        assert!(result.timed_out);
        assert_eq!(result.stdout, "started\n");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_missing_program() {
        let sqlline = Sqlline::new("/nonexistent/sqlline", None);
        let connection = ConnectionDescriptor::new(&target(), &AuthMode::Tls);
        let err = sqlline
            .run(&connection, &ScriptSource::Inline(String::from("select 1")), "default", &credentials())
            .unwrap_err();
        assert!(matches!(err, RunError::Launch { .. }));
    }
}
