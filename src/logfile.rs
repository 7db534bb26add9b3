use crate::flags::Config;
use chrono::{DateTime, TimeZone};
use error_chain::error_chain;
use fs2::FileExt;
use std::fmt::{self, Display, Write as _};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

error_chain! {
    errors {
        CreateLogDir(path: PathBuf) {
            description("failed to create log directory")
            display("failed to create log directory `{}`", path.display())
        }
        OpenLogFile(path: PathBuf) {
            description("failed to open log file")
            display("failed to open log file `{}`", path.display())
        }
    }
    foreign_links {
        IOError(std::io::Error);
    }
}

/// Formats `now` with `time_format`. `None` when the pattern is malformed or
/// the result could not serve as a single file name.
pub fn file_stem<Tz>(time_format: &str, now: &DateTime<Tz>) -> Option<String>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut stem = String::new();
    write!(stem, "{}", now.format(time_format)).ok()?;
    if stem.is_empty() || stem == "." || stem == ".." || stem.contains(std::path::is_separator) {
        return None;
    }
    Some(stem)
}

pub fn ensure_log_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).chain_err(|| ErrorKind::CreateLogDir(dir.to_path_buf()))
}

/// Paths of the stdout (or combined) log file and, when split, the stderr one.
#[derive(Debug, Clone, PartialEq)]
pub struct LogPaths {
    pub stdout: PathBuf,
    pub stderr: Option<PathBuf>,
}

impl LogPaths {
    pub fn at<Tz>(config: &Config, now: &DateTime<Tz>) -> Result<LogPaths>
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let stem = file_stem(&config.time_format, now).ok_or_else(|| {
            Error::from(format!("invalid time format '{}'", config.time_format))
        })?;
        Ok(LogPaths {
            stdout: config.log_dir.join(format!("{}.log", stem)),
            stderr: if config.split_stderr {
                Some(config.log_dir.join(format!("{}.err.log", stem)))
            } else {
                None
            },
        })
    }
}

/// An hourly log file opened for appending. Every write holds an exclusive
/// advisory lock so concurrent runs sharing the file never split a chunk.
pub struct LogFile {
    file: File,
    path: PathBuf,
}

impl LogFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<LogFile> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .chain_err(|| ErrorKind::OpenLogFile(path.to_path_buf()))?;
        Ok(LogFile {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.file.lock_exclusive()?;
        let written = self.file.write_all(chunk).and_then(|_| self.file.flush());
        let unlocked = self.file.unlock();
        written.and(unlocked)
    }
}

impl fmt::Debug for LogFile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "LogFile{{path:{}}}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Local, Utc};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 3, 16, hour, 41, 7).unwrap()
    }

    fn config(dir: &Path) -> Config {
        Config {
            log_dir: dir.to_path_buf(),
            ..Config::default()
        }
    }

    #[test]
    fn test_file_stem_default_format() {
        assert_eq!(file_stem("%m-%d_%H", &at(9)).as_deref(), Some("03-16_09"));
        assert_eq!(file_stem("%m-%d_%H", &at(23)).as_deref(), Some("03-16_23"));
    }

    #[test]
    fn test_file_stem_uses_the_given_offset() {
        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        assert_eq!(
            file_stem("%m-%d_%H", &at(20).with_timezone(&tokyo)).as_deref(),
            Some("03-17_05")
        );
        assert!(file_stem("%m-%d_%H", &Local::now()).is_some());
    }

    #[test]
    fn test_file_stem_rejects_unusable_names() {
        assert_eq!(file_stem("", &at(9)), None);
        assert_eq!(file_stem("%Y/%m", &at(9)), None);
        assert_eq!(file_stem("%m-%", &at(9)), None);
        assert_eq!(file_stem("..", &at(9)), None);
    }

    #[test]
    fn test_ensure_log_dir_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("log");
        ensure_log_dir(&dir).unwrap();
        ensure_log_dir(&dir).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_ensure_log_dir_fails_on_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("log");
        fs::write(&dir, b"not a directory").unwrap();
        match ensure_log_dir(&dir).unwrap_err().kind() {
            ErrorKind::CreateLogDir(path) => assert_eq!(path, &dir),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_log_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config(tmp.path());
        assert_eq!(
            LogPaths::at(&config, &at(9)).unwrap(),
            LogPaths {
                stdout: tmp.path().join("03-16_09.log"),
                stderr: None,
            }
        );
        config.split_stderr = true;
        assert_eq!(
            LogPaths::at(&config, &at(9)).unwrap().stderr,
            Some(tmp.path().join("03-16_09.err.log"))
        );
    }

    #[test]
    fn test_same_hour_appends() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        let first = LogPaths::at(&config, &at(9)).unwrap();
        let second = LogPaths::at(&config, &Utc.with_ymd_and_hms(2022, 3, 16, 9, 59, 59).unwrap()).unwrap();
        assert_eq!(first, second);

        LogFile::open(&first.stdout)
            .unwrap()
            .append(b"first run\n")
            .unwrap();
        LogFile::open(&second.stdout)
            .unwrap()
            .append(b"second run\n")
            .unwrap();
        assert_eq!(
            fs::read_to_string(&first.stdout).unwrap(),
            "first run\nsecond run\n"
        );
    }

    #[test]
    fn test_different_hours_get_distinct_files() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        let nine = LogPaths::at(&config, &at(9)).unwrap();
        let ten = LogPaths::at(&config, &at(10)).unwrap();
        assert_ne!(nine.stdout, ten.stdout);

        LogFile::open(&nine.stdout).unwrap().append(b"nine\n").unwrap();
        LogFile::open(&ten.stdout).unwrap().append(b"ten\n").unwrap();
        assert_eq!(fs::read_to_string(&nine.stdout).unwrap(), "nine\n");
        assert_eq!(fs::read_to_string(&ten.stdout).unwrap(), "ten\n");
    }

    #[test]
    fn test_open_fails_in_missing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("missing").join("03-16_09.log");
        match LogFile::open(&path).unwrap_err().kind() {
            ErrorKind::OpenLogFile(p) => assert_eq!(p, &path),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
