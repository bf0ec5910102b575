//! Build progress reporting, for the purpose of display to the user.

use crate::process::{CommandOutput, Termination};
use std::io::Write;
use std::sync::Mutex;

/// Trait for build progress notifications.  Called concurrently from the
/// executor's worker threads.
pub trait Progress: Send + Sync {
    /// Called when a command starts.
    fn task_started(&self, message: &str, cmdline: &str);

    /// Called when a command completes.
    fn task_finished(&self, message: &str, result: &CommandOutput);

    /// Log a line of output.  For example, used when a task fails outside of
    /// any command (a missing input, a failed store).
    fn log(&self, msg: &str);
}

/// Progress implementation for a "dumb" console, without any overprinting.
#[derive(Default)]
pub struct ConsoleProgress {
    /// Whether to print command lines of started programs.
    verbose: bool,

    /// The message of the last command printed, used to avoid printing it
    /// twice when the same command starts and finishes back to back.
    last_started: Mutex<Option<String>>,
}

impl ConsoleProgress {
    pub fn new(verbose: bool) -> Self {
        ConsoleProgress {
            verbose,
            last_started: Mutex::new(None),
        }
    }
}

impl Progress for ConsoleProgress {
    fn task_started(&self, message: &str, cmdline: &str) {
        self.log(if self.verbose { cmdline } else { message });
        *self.last_started.lock().unwrap() = Some(message.to_owned());
    }

    fn task_finished(&self, message: &str, result: &CommandOutput) {
        let just_printed = self.last_started.lock().unwrap().as_deref() == Some(message);
        let has_output = !result.stdout.is_empty() || !result.stderr.is_empty();
        match result.termination {
            Termination::Success => {
                if has_output && !just_printed {
                    self.log(message)
                }
            }
            Termination::Interrupted => self.log(&format!("interrupted: {}", message)),
            Termination::Failure => self.log(&format!("failed: {}", message)),
        };
        if has_output {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            let _ = lock.write_all(&result.stdout);
            let _ = lock.write_all(&result.stderr);
        }
    }

    fn log(&self, msg: &str) {
        println!("{}", msg);
    }
}
