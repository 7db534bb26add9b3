use crate::logfile::LogFile;
use error_chain::error_chain;
use std::io::{self, ErrorKind as IoErrorKind, Read, Write};
use std::mem;
use std::path::PathBuf;
use std::process::{Child, ExitStatus};
use std::thread;

error_chain! {
    errors {
        LogWrite(path: PathBuf) {
            description("failed to write log file")
            display("failed to write log file `{}`", path.display())
        }
        WorkerPanicked {
            description("output worker panicked")
            display("output worker panicked")
        }
    }
    foreign_links {
        IOError(std::io::Error);
    }
}

const CHUNK_SIZE: usize = 1 << 12;

/// One output stream of the child and the two places it is copied to.
pub struct Stream<Reader, Terminal> {
    pub src: Reader,
    pub terminal: Terminal,
    pub log: LogFile,
}

/// Waits for the child while copying its output to the terminals and the log
/// files, then maps the child's exit status to the wrapper's exit code.
pub fn tee_output<Read1, Term1, Read2, Term2>(
    mut process: Child,
    stdout: Stream<Read1, Term1>,
    stderr: Option<Stream<Read2, Term2>>,
) -> Result<i32>
where
    Read1: Read + Send + 'static,
    Term1: Write + Send + 'static,
    Read2: Read + Send + 'static,
    Term2: Write + Send + 'static,
{
    let worker1 = TeeWorker::new(stdout.src, stdout.terminal, stdout.log).spawn();
    let worker2 =
        stderr.map(|stderr| TeeWorker::new(stderr.src, stderr.terminal, stderr.log).spawn());
    let status = process.wait()?;
    let copied = join(worker1);
    let copied_stderr = worker2.map(join).transpose();
    copied?;
    copied_stderr?;
    tracing::debug!(%status, "target exited");
    Ok(exit_code(status))
}

fn join(worker: thread::JoinHandle<Result<u64>>) -> Result<u64> {
    worker
        .join()
        .map_err(|_| Error::from(ErrorKind::WorkerPanicked))?
}

/// The child's exit code, or `128 + signal` when it was killed by a signal.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

/// Copies one output stream of the child to a terminal sink and a log file.
///
/// The terminal gets every chunk as it arrives. The log gets whole lines, so
/// runs appending to the same file never tear each other's lines; a trailing
/// partial line waits for its newline, for the stream to end, or for
/// `CHUNK_SIZE` bytes to pile up.
struct TeeWorker<Reader: Read, Terminal: Write> {
    src: Reader,
    terminal: Terminal,
    log: LogFile,
    pending: Vec<u8>,
    terminal_failed: bool,
    log_error: Option<io::Error>,
}

impl<Reader, Terminal> TeeWorker<Reader, Terminal>
where
    Reader: Read + Send + 'static,
    Terminal: Write + Send + 'static,
{
    fn new(src: Reader, terminal: Terminal, log: LogFile) -> TeeWorker<Reader, Terminal> {
        TeeWorker {
            src,
            terminal,
            log,
            pending: Vec::with_capacity(CHUNK_SIZE),
            terminal_failed: false,
            log_error: None,
        }
    }

    fn spawn(self) -> thread::JoinHandle<Result<u64>> {
        thread::spawn(move || self.teeworker())
    }

    /// Returns the number of bytes read from the child. A log write failure
    /// stops logging but not forwarding, so the child never blocks on a full
    /// pipe; the failure is reported once the stream ends. Returning drops
    /// `src`, the only read end of the pipe, so a child still writing after
    /// a read error gets `EPIPE` instead of blocking.
    fn teeworker(mut self) -> Result<u64> {
        let mut buf = [0u8; CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            let length = match self.src.read(&mut buf) {
                Ok(0) => break,
                Ok(length) => length,
                Err(ref err) if err.kind() == IoErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::error!(error = %err, "reading target output failed");
                    self.flush_pending();
                    return Err(err.into());
                }
            };
            let chunk = &buf[..length];
            self.record(chunk);
            self.forward(chunk);
            total += length as u64;
        }
        self.flush_pending();
        match self.log_error.take() {
            Some(err) => Err(Error::with_chain(
                err,
                ErrorKind::LogWrite(self.log.path().to_path_buf()),
            )),
            None => Ok(total),
        }
    }

    fn forward(&mut self, chunk: &[u8]) {
        if self.terminal_failed {
            return;
        }
        if let Err(err) = self
            .terminal
            .write_all(chunk)
            .and_then(|_| self.terminal.flush())
        {
            tracing::warn!(error = %err, "terminal closed, output still goes to the log file");
            self.terminal_failed = true;
        }
    }

    fn record(&mut self, chunk: &[u8]) {
        if self.log_error.is_some() {
            return;
        }
        self.pending.extend_from_slice(chunk);
        let complete = match self.pending.iter().rposition(|&b| b == b'\n') {
            Some(newline) => newline + 1,
            None if self.pending.len() >= CHUNK_SIZE => self.pending.len(),
            None => return,
        };
        let rest = self.pending.split_off(complete);
        let lines = mem::replace(&mut self.pending, rest);
        self.append(&lines);
    }

    fn flush_pending(&mut self) {
        if self.log_error.is_some() || self.pending.is_empty() {
            return;
        }
        let rest = mem::take(&mut self.pending);
        self.append(&rest);
    }

    fn append(&mut self, bytes: &[u8]) {
        if let Err(err) = self.log.append(bytes) {
            tracing::error!(error = %err, path = %self.log.path().display(), "log file write failed, output only goes to the terminal");
            self.log_error = Some(err);
        }
    }
}
