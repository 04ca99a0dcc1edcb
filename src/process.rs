//! Running generator subprocesses.

use std::io::Write;
use std::process::{Command, ExitStatus, Stdio};

#[derive(Debug, PartialEq)]
pub enum Termination {
    Success,
    Interrupted,
    Failure,
}

fn termination(status: ExitStatus, output: &mut Vec<u8>) -> anyhow::Result<Termination> {
    if status.success() {
        return Ok(Termination::Success);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            if sig == libc::SIGINT {
                write!(output, "interrupted")?;
                return Ok(Termination::Interrupted);
            }
            write!(output, "signal {}", sig)?;
        }
    }
    #[cfg(not(unix))]
    let _ = &output;
    Ok(Termination::Failure)
}

/// Run a command to completion.  When streaming, its output goes straight to
/// our stdout and stderr and the returned output is empty; otherwise stdout
/// and then stderr are captured and returned.
pub fn run_command(cmd: &mut Command, stream: bool) -> anyhow::Result<(Termination, Vec<u8>)> {
    cmd.stdin(Stdio::null());
    if stream {
        let status = cmd.status()?;
        let mut output = Vec::new();
        let termination = termination(status, &mut output)?;
        if !output.is_empty() {
            std::io::stderr().write_all(&output)?;
            writeln!(std::io::stderr())?;
            output.clear();
        }
        return Ok((termination, output));
    }
    let out = cmd.output()?;
    let mut output = out.stdout;
    output.extend_from_slice(&out.stderr);
    let termination = termination(out.status, &mut output)?;
    Ok((termination, output))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_both_streams() -> anyhow::Result<()> {
        let mut cmd = Command::new("/bin/sh");
        cmd.args(["-c", "echo out; echo err >&2"]);
        let (term, output) = run_command(&mut cmd, false)?;
        assert_eq!(term, Termination::Success);
        assert_eq!(output, b"out\nerr\n");
        Ok(())
    }

    #[test]
    fn failure_and_signals() -> anyhow::Result<()> {
        let (term, _) = run_command(Command::new("/bin/sh").args(["-c", "exit 3"]), false)?;
        assert_eq!(term, Termination::Failure);
        let (term, output) =
            run_command(Command::new("/bin/sh").args(["-c", "kill -INT $$"]), false)?;
        assert_eq!(term, Termination::Interrupted);
        assert!(output.ends_with(b"interrupted"));
        assert!(run_command(&mut Command::new("/surely/not/a/binary"), false).is_err());
        Ok(())
    }
}
