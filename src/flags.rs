use crate::logfile;
use chrono::Local;
use clap::{crate_authors, crate_version, App, AppSettings, Arg, ArgMatches};
use std::ffi::OsString;
use std::path::PathBuf;

use error_chain::error_chain;

error_chain! {
    errors {
        MissingTarget(usage: String) {
            description("no target script given")
            display("no target script given\n\n{}", usage)
        }
        InvalidTimeFormat(format: String) {
            description("invalid log file time format")
            display("`--time-format` '{}' must be a valid strftime pattern yielding a non-empty file name without path separators", format)
        }
    }
    foreign_links {
        ClapError(clap::Error);
    }
}

pub const DEFAULT_LOG_DIR: &str = "log";
pub const DEFAULT_TIME_FORMAT: &str = "%m-%d_%H";

/// Where and how log files are named. Passed explicitly into the run.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub log_dir: PathBuf,
    pub time_format: String,
    pub split_stderr: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            time_format: DEFAULT_TIME_FORMAT.to_string(),
            split_stderr: false,
        }
    }
}

#[derive(Debug)]
pub struct Flags {
    pub config: Config,
    pub verbose: bool,
    pub target: OsString,
    pub target_args: Vec<OsString>,
}

fn app<'a, 'b>() -> App<'a, 'b> {
    App::new("runlog").about("Run a script and tee its output into an hourly log file").author(crate_authors!()).version(crate_version!()).
        setting(AppSettings::TrailingVarArg).
        arg(Arg::with_name("LOG_DIR").long("log-dir").env("RUNLOG_DIR").default_value(DEFAULT_LOG_DIR).help("Directory holding the log files, created if absent").takes_value(true)).
        arg(Arg::with_name("TIME_FORMAT").long("time-format").env("RUNLOG_TIME_FORMAT").default_value(DEFAULT_TIME_FORMAT).help("strftime pattern naming the log file; runs sharing a name append to the same file").takes_value(true)).
        arg(Arg::with_name("SPLIT_STDERR").long("split-stderr").help("Log the target's stderr into a separate `.err.log` file instead of merging it into stdout")).
        arg(Arg::with_name("VERBOSE").short("v").long("verbose").help("Print debug diagnostics to stderr")).
        arg(Arg::with_name("COMMAND").multiple(true).help("Target script followed by its own arguments"))
}

/// Parses the process arguments, exiting on `--help`, `--version` or malformed options.
pub fn parse_flags() -> Result<Flags> {
    from_matches(&app().get_matches())
}

pub fn parse_flags_from<I, T>(args: I) -> Result<Flags>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    from_matches(&app().get_matches_from_safe(args)?)
}

fn from_matches(matches: &ArgMatches) -> Result<Flags> {
    let mut command = matches
        .values_of_os("COMMAND")
        .map_or(vec![], |values| values.map(|s| s.to_os_string()).collect::<Vec<_>>())
        .into_iter();
    let target = match command.next() {
        Some(target) if !target.is_empty() => target,
        _ => return Err(ErrorKind::MissingTarget(matches.usage().to_string()).into()),
    };

    let time_format = matches
        .value_of("TIME_FORMAT")
        .unwrap_or(DEFAULT_TIME_FORMAT)
        .to_string();
    if logfile::file_stem(&time_format, &Local::now()).is_none() {
        return Err(ErrorKind::InvalidTimeFormat(time_format).into());
    }

    Ok(Flags {
        config: Config {
            log_dir: matches
                .value_of_os("LOG_DIR")
                .map_or_else(|| PathBuf::from(DEFAULT_LOG_DIR), PathBuf::from),
            time_format,
            split_stderr: matches.is_present("SPLIT_STDERR"),
        },
        verbose: matches.is_present("VERBOSE"),
        target,
        target_args: command.collect(),
    })
}
