mod cmd;
mod flags;
mod logfile;
mod tee;

use chrono::Local;
use error_chain::{error_chain, quick_main};
use std::io;
use tracing_subscriber::EnvFilter;

error_chain! {
    links {
        FlagsError(flags::Error, flags::ErrorKind);
        LogFileError(logfile::Error, logfile::ErrorKind);
        RunCmdError(cmd::Error, cmd::ErrorKind);
        TeeError(tee::Error, tee::ErrorKind);
    }
}

quick_main!(|| -> Result<i32> {
    let flags = flags::parse_flags()?;
    init_logging(flags.verbose);
    run(&flags)
});

/// Runs the target once, returning its exit code.
fn run(flags: &flags::Flags) -> Result<i32> {
    let config = &flags.config;
    logfile::ensure_log_dir(&config.log_dir)?;
    let paths = logfile::LogPaths::at(config, &Local::now())?;
    tracing::debug!(?paths, "logging target output");

    // Logs open before the spawn, so a target that fails to launch leaves an empty log behind.
    let stdout_log = logfile::LogFile::open(&paths.stdout)?;
    let stderr_log = match &paths.stderr {
        Some(path) => Some(logfile::LogFile::open(path)?),
        None => None,
    };
    let (child, stdout, stderr) = cmd::run_cmd(flags)?;
    let stdout = tee::Stream {
        src: stdout,
        terminal: io::stdout(),
        log: stdout_log,
    };
    let stderr = match (stderr, stderr_log) {
        (Some(src), Some(log)) => Some(tee::Stream {
            src,
            terminal: io::stderr(),
            log,
        }),
        _ => None,
    };
    Ok(tee::tee_output(child, stdout, stderr)?)
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "runlog=debug" } else { "runlog=warn" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
