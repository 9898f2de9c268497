//! Makes sure a Kerberos ticket is cached before sqlline tries to use one.
//!
//! `klist -s` answers whether a valid ticket exists through its exit code alone. When it doesn't,
//! and a keytab was given, `kinit -kt <keytab> <principal>` is used to get one.

use std::io;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

use log::{debug, info};
use thiserror::Error;

use crate::config::Tools;

#[derive(Debug, Error)]
pub enum KerberosError {
    #[error("no kerberos ticket found and no keytab provided")]
    NoTicketNoKeytab,
    #[error("failed to run '{program}': {source}")]
    Launch { program: String, source: io::Error },
    #[error("failed to kinit as {principal}: {status}")]
    KinitFailed { principal: String, status: ExitStatus },
}

pub fn principal(username: &str, realm: &str) -> String {
    format!("{}@{}", username, realm)
}

fn status_of(command: &mut Command, program: &str) -> Result<ExitStatus, KerberosError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .status()
        .map_err(|source| KerberosError::Launch { program: program.to_string(), source })
}

pub fn has_ticket(tools: &Tools) -> Result<bool, KerberosError> {
    let status = status_of(Command::new(&tools.klist).arg("-s"), &tools.klist)?;
    debug!("{} -s exited with {}", tools.klist, status);
    Ok(status.success())
}

pub fn ensure_ticket(
    tools: &Tools,
    username: &str,
    realm: &str,
    keytab: Option<&Path>,
) -> Result<(), KerberosError> {
    if has_ticket(tools)? {
        debug!("Found a cached kerberos ticket");
        return Ok(());
    }
    let keytab = keytab.ok_or(KerberosError::NoTicketNoKeytab)?;

    let principal = principal(username, realm);
    info!("No kerberos ticket found, calling {} for {}", tools.kinit, principal);
    let status = status_of(
        Command::new(&tools.kinit).arg("-kt").arg(keytab).arg(&principal),
        &tools.kinit,
    )?;
    if !status.success() {
        return Err(KerberosError::KinitFailed { principal, status });
    }
    Ok(())
}
