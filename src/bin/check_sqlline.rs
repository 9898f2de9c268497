//! `check_sqlline` times a HiveServer2 query run through `sqlline` and reports it as a monitoring
//! plugin: one status line on stdout, the query time as perfdata, and the matching exit code.
//! Everything else, including the raw sqlline output, goes to the log files.

use std::process;

use anyhow::Context;
use clap::ErrorKind;
use log::{debug, error, info};
use structopt::StructOpt;

use sqlline_check::check::{Check, CheckError, Report, CHECK_NAME};
use sqlline_check::config::{CheckConfig, CmdOpts};
use sqlline_check::logging::{self, LogFiles};
use sqlline_check::ExitCode;

fn run(opts: CmdOpts) -> anyhow::Result<Report> {
    let files = LogFiles::new(&opts.log_folder(), &opts.log_name, &opts.hostname);
    let _guard = logging::init(
        files.clone(),
        logging::console_level(opts.verbose, opts.debug),
        opts.truncate_logs,
    )
    .with_context(|| format!("cannot log to {}", files.info.display()))?;
    debug!("===== Starting Logger =====");

    let report = match CheckConfig::from_opts(&opts) {
        Ok(config) => {
            debug!("{:?}", config);
            info!("Running check");
            Check::new(config).report()
        }
        Err(err) => {
            error!("{}", err);
            Report::from_error(&CheckError::from(err))
        }
    };
    info!("{}", report);
    Ok(report)
}

fn main() {
    // Monitoring plugin guidelines reserve exit code 3 (UNKNOWN) for usage errors, and that
    // includes --help and --version.
    let opts = match CmdOpts::from_iter_safe(std::env::args_os()) {
        Ok(opts) => opts,
        Err(err) => {
            match err.kind {
                ErrorKind::HelpDisplayed | ErrorKind::VersionDisplayed => println!("{}", err.message),
                _ => {
                    let first_line = err.message.lines().next().unwrap_or_default();
                    println!("{} UNKNOWN - {}", CHECK_NAME, first_line.trim_start_matches("error: "));
                }
            }
            process::exit(3);
        }
    };

    let exit_code = match run(opts) {
        Ok(report) => {
            println!("{}", report);
            report.exit_code()
        }
        Err(err) => {
            println!("{} UNKNOWN - {:#}", CHECK_NAME, err);
            3
        }
    };
    process::exit(i32::from(exit_code));
}
