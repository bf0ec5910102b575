//! Runs external commands (compilers, archivers, generator steps).
//! Unaware of targets and schemas; just command execution.

use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Success,
    Interrupted,
    Failure,
}

/// The captured result of running one command line.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub termination: Termination,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.termination == Termination::Success
    }

    pub fn stdout_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.stdout)
            .lines()
            .map(str::to_owned)
            .collect()
    }

    pub fn stderr_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.stderr)
            .lines()
            .map(str::to_owned)
            .collect()
    }
}

/// Command execution seam.  Any non-zero exit or spawn failure is a failed
/// command; specific exit codes are never inspected.
pub trait Execute: Send + Sync {
    /// Returns an Err() if we failed outside of the process itself.
    fn execute(&self, cmdline: &str, working_dir: Option<&Path>) -> anyhow::Result<CommandOutput>;
}

/// Runs command lines through the platform shell.
#[derive(Debug, Default)]
pub struct ShellExecutor;

#[cfg(unix)]
fn shell_command(cmdline: &str) -> std::process::Command {
    let mut cmd = std::process::Command::new("/bin/sh");
    cmd.arg("-c").arg(cmdline);
    cmd
}

#[cfg(windows)]
fn shell_command(cmdline: &str) -> std::process::Command {
    let mut cmd = std::process::Command::new("cmd");
    cmd.arg("/C").arg(cmdline);
    cmd
}

#[cfg(unix)]
fn termination(status: std::process::ExitStatus, stderr: &mut Vec<u8>) -> Termination {
    use std::io::Write;
    use std::os::unix::process::ExitStatusExt;

    if status.success() {
        return Termination::Success;
    }
    match status.signal() {
        Some(libc::SIGINT) => {
            let _ = write!(stderr, "interrupted");
            Termination::Interrupted
        }
        Some(sig) => {
            let _ = write!(stderr, "signal {}", sig);
            Termination::Failure
        }
        None => Termination::Failure,
    }
}

#[cfg(windows)]
fn termination(status: std::process::ExitStatus, _stderr: &mut Vec<u8>) -> Termination {
    if status.success() {
        Termination::Success
    } else {
        Termination::Failure
    }
}

impl Execute for ShellExecutor {
    fn execute(&self, cmdline: &str, working_dir: Option<&Path>) -> anyhow::Result<CommandOutput> {
        let mut cmd = shell_command(cmdline);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        let output = cmd.output()?;
        let mut stderr = output.stderr;
        let termination = termination(output.status, &mut stderr);
        Ok(CommandOutput {
            termination,
            stdout: output.stdout,
            stderr,
        })
    }
}
