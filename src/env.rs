//! The per-invocation build context: project layout, the process-wide task
//! state and the collaborators every target shares.

use crate::path::Fingerprint;
use crate::process::{CommandOutput, Execute, ShellExecutor, Termination};
use crate::progress::{ConsoleProgress, Progress};
use crate::trace::Trace;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Success,
    Failure,
}

/// A task state read and written from arbitrarily many tasks at once.
#[derive(Debug)]
pub struct SharedTaskState(AtomicBool);

impl Default for SharedTaskState {
    fn default() -> Self {
        SharedTaskState(AtomicBool::new(true))
    }
}

impl SharedTaskState {
    pub fn get(&self) -> TaskState {
        if self.0.load(Ordering::Acquire) {
            TaskState::Success
        } else {
            TaskState::Failure
        }
    }

    pub fn set(&self, state: TaskState) {
        self.0.store(state == TaskState::Success, Ordering::Release);
    }

    pub fn fail(&self) {
        self.set(TaskState::Failure);
    }

    pub fn is_success(&self) -> bool {
        self.get() == TaskState::Success
    }
}

/// Shared state of one build invocation.  Created by the top-level run and
/// handed by reference to every target, generator and task.
pub struct Context {
    root_dir: PathBuf,
    build_dir: PathBuf,
    fingerprint: Fingerprint,
    task_state: SharedTaskState,
    executor: Box<dyn Execute>,
    progress: Box<dyn Progress>,
    trace: Option<Trace>,
    commands_run: AtomicUsize,
}

impl Context {
    pub fn new(root_dir: impl Into<PathBuf>, build_dir: impl Into<PathBuf>) -> Self {
        Context {
            root_dir: crate::canon::canon_path(root_dir.into()),
            build_dir: crate::canon::canon_path(build_dir.into()),
            fingerprint: Fingerprint::Timestamp,
            task_state: SharedTaskState::default(),
            executor: Box::new(ShellExecutor),
            progress: Box::new(ConsoleProgress::new(false)),
            trace: None,
            commands_run: AtomicUsize::new(0),
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    pub fn with_executor(mut self, executor: impl Execute + 'static) -> Self {
        self.executor = Box::new(executor);
        self
    }

    pub fn with_progress(mut self, progress: impl Progress + 'static) -> Self {
        self.progress = Box::new(progress);
        self
    }

    pub fn with_trace(mut self, trace: Trace) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// The process-wide task state: once any task fails, tasks that have not
    /// started yet skip their work.
    pub fn task_state(&self) -> &SharedTaskState {
        &self.task_state
    }

    pub fn progress(&self) -> &dyn Progress {
        self.progress.as_ref()
    }

    pub fn trace(&self) -> Option<&Trace> {
        self.trace.as_ref()
    }

    /// Number of external commands started since the last reset.
    pub fn commands_run(&self) -> usize {
        self.commands_run.load(Ordering::Relaxed)
    }

    /// Prepare for another top-level run within the same process.
    pub fn reset(&self) {
        self.task_state.set(TaskState::Success);
        self.commands_run.store(0, Ordering::Relaxed);
    }

    /// Run `f` under a trace event if tracing is enabled.
    pub fn scope<T>(&self, name: &str, f: impl FnOnce() -> T) -> T {
        match &self.trace {
            None => f(),
            Some(trace) => trace.scope(name, f),
        }
    }

    /// Execute one command line, reporting progress.  Returns whether it
    /// succeeded; a command that could not be spawned counts as a failure.
    pub fn run_command(&self, message: &str, cmdline: &str, working_dir: Option<&Path>) -> bool {
        self.commands_run.fetch_add(1, Ordering::Relaxed);
        self.progress.task_started(message, cmdline);
        let result = self.scope(message, || self.executor.execute(cmdline, working_dir));
        let output = match result {
            Ok(output) => output,
            Err(err) => CommandOutput {
                termination: Termination::Failure,
                stdout: Vec::new(),
                stderr: err.to_string().into_bytes(),
            },
        };
        self.progress.task_finished(message, &output);
        if !output.success() {
            tracing::error!("command failed: {}", cmdline);
        }
        output.success()
    }
}
