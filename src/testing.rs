//! Helpers shared by unit tests: a scratch project and a command executor
//! that records instead of running.

use crate::env::Context;
use crate::process::{CommandOutput, Execute, Termination};
use crate::toolchain::Toolchain;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Log {
    commands: Vec<String>,
    fail_matching: Option<String>,
}

/// Records every command line; fails those containing a chosen substring.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Log>>);

impl Recorder {
    pub fn commands(&self) -> Vec<String> {
        self.0.lock().unwrap().commands.clone()
    }

    pub fn matching(&self, needle: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.contains(needle))
            .collect()
    }

    pub fn fail_matching(&self, needle: Option<&str>) {
        self.0.lock().unwrap().fail_matching = needle.map(str::to_owned);
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().commands.clear();
    }
}

impl Execute for Recorder {
    fn execute(&self, cmdline: &str, _working_dir: Option<&Path>) -> anyhow::Result<CommandOutput> {
        let mut log = self.0.lock().unwrap();
        log.commands.push(cmdline.to_owned());
        let fail = matches!(&log.fail_matching, Some(needle) if cmdline.contains(needle.as_str()));
        Ok(CommandOutput {
            termination: if fail {
                Termination::Failure
            } else {
                Termination::Success
            },
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }
}

/// A temporary project directory with a build context rooted in it.
pub struct Space {
    pub dir: tempfile::TempDir,
    pub ctx: Context,
    pub toolchain: Toolchain,
    pub recorder: Recorder,
}

impl Space {
    pub fn new() -> Space {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::default();
        let ctx = Context::new(dir.path(), dir.path().join("build"))
            .with_executor(recorder.clone());
        Space {
            dir,
            ctx,
            toolchain: Toolchain::gcc(),
            recorder,
        }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        crate::canon::canon_path(self.dir.path().join(rel))
    }

    /// Write a file with a fixed modification time, in seconds.
    pub fn write(&self, rel: &str, content: &str, mtime: i64) {
        let path = self.path(rel);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        self.touch(rel, mtime);
    }

    pub fn touch(&self, rel: &str, mtime: i64) {
        filetime::set_file_mtime(self.path(rel), filetime::FileTime::from_unix_time(mtime, 0))
            .unwrap();
    }

    /// Prepare for another build in the same space.
    pub fn next_run(&self) {
        self.ctx.reset();
        self.recorder.clear();
    }
}
