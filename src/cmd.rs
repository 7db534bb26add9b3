use crate::flags;
use os_pipe::PipeReader;
use std::ffi::OsString;
use std::process::{Child, Command, Stdio};

use error_chain::error_chain;

error_chain! {
    errors {
        Spawn(target: OsString) {
            description("failed to launch target")
            display("failed to launch target `{}`", target.to_string_lossy())
        }
    }
    foreign_links {
        PipeError(std::io::Error);
    }
}

/// Spawns the target with stdout and stderr wired into pipes. The second
/// reader is only present when stderr is split from stdout.
///
/// The write ends are owned by `command` and closed when it drops, so the
/// readers hit end of stream once the child and its descendants exit.
pub fn run_cmd(f: &flags::Flags) -> Result<(Child, PipeReader, Option<PipeReader>)> {
    let mut command = Command::new(&f.target);
    command.args(&f.target_args).stdin(Stdio::inherit());
    let (child, stdout, stderr) = if f.config.split_stderr {
        let (reader1, writer1) = os_pipe::pipe()?;
        let (reader2, writer2) = os_pipe::pipe()?;
        command.stdout(writer1).stderr(writer2);
        let child = command
            .spawn()
            .chain_err(|| ErrorKind::Spawn(f.target.clone()))?;
        (child, reader1, Some(reader2))
    } else {
        let (reader, writer) = os_pipe::pipe()?;
        let writer2 = writer.try_clone()?;
        command.stdout(writer).stderr(writer2);
        let child = command
            .spawn()
            .chain_err(|| ErrorKind::Spawn(f.target.clone()))?;
        (child, reader, None)
    };
    tracing::debug!(pid = child.id(), target = ?f.target, "target launched");
    Ok((child, stdout, stderr))
}
