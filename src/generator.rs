//! Generators: arbitrary commands turning input files into output files,
//! rerun when the inputs, the declared outputs or the commands change.

use crate::canon::{canon_join, path_for_command};
use crate::env::{Context, SharedTaskState, TaskState};
use crate::error::{config, misuse, Error, Result};
use crate::eval::Command;
use crate::graph::{TaskGraph, TaskId};
use crate::path::RelationalPathSet;
use crate::recheck::{Recheck, RecheckEvent, RecheckObserver, INPUT_EVENTS};
use crate::register::{BuildStatus, Builder};
use crate::schema::{GeneratorSchema, Serialization};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA_EXT: &str = "cc2";

#[derive(Default)]
struct GenerateState {
    inputs: RelationalPathSet,
    dirty: bool,
}

pub struct Generator<'a> {
    name: String,
    ctx: &'a Context,
    root_dir: PathBuf,
    build_dir: PathBuf,
    parallel: bool,
    command: Command,
    inputs: RelationalPathSet,
    outputs: BTreeSet<PathBuf>,
    commands: Vec<String>,
    locked: bool,
    serialization: Serialization<GeneratorSchema>,
    state: Mutex<GenerateState>,
    status: Mutex<BuildStatus>,
    task_state: SharedTaskState,
    observer: Option<&'a dyn RecheckObserver>,
}

impl<'a> Generator<'a> {
    /// `root` is relative to the project root unless absolute.  With
    /// `parallel`, commands run concurrently and in no particular order.
    pub fn new(
        name: impl Into<String>,
        ctx: &'a Context,
        root: impl AsRef<Path>,
        parallel: bool,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.contains(std::path::is_separator) {
            return config(format!("invalid generator name {:?}", name));
        }
        let root_dir = canon_join(ctx.root_dir(), root.as_ref());
        let build_dir = ctx.build_dir().join(&name);
        let mut command = Command::new();
        command.add_default_arguments([
            ("project_root_dir", path_for_command(ctx.root_dir())),
            ("project_build_dir", path_for_command(ctx.build_dir())),
            ("gen_root_dir", path_for_command(&root_dir)),
            ("gen_build_dir", path_for_command(&build_dir)),
        ]);
        let serialization =
            Serialization::new(build_dir.join(format!("{}.{}", name, SCHEMA_EXT)));
        Ok(Generator {
            name,
            ctx,
            root_dir,
            build_dir,
            parallel,
            command,
            inputs: RelationalPathSet::new(),
            outputs: BTreeSet::new(),
            commands: Vec::new(),
            locked: false,
            serialization,
            state: Mutex::new(GenerateState::default()),
            status: Mutex::new(BuildStatus::Unbuilt),
            task_state: SharedTaskState::default(),
            observer: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn inputs(&self) -> &BTreeSet<PathBuf> {
        self.inputs.user()
    }

    pub fn outputs(&self) -> &BTreeSet<PathBuf> {
        &self.outputs
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn status(&self) -> BuildStatus {
        *self.status.lock().unwrap()
    }

    pub fn is_built(&self) -> bool {
        self.status() == BuildStatus::Completed
    }

    pub fn set_observer(&mut self, observer: &'a dyn RecheckObserver) {
        self.observer = Some(observer);
    }

    fn check_unlocked(&self, op: &'static str) -> Result<()> {
        if self.locked {
            return Err(Error::Locked {
                name: self.name.clone(),
                op,
            });
        }
        Ok(())
    }

    /// Make `{identifier}` available to every later input, output and
    /// command pattern.
    pub fn add_default_argument(
        &mut self,
        identifier: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<()> {
        self.check_unlocked("add_default_argument")?;
        self.command.add_default_argument(identifier, value);
        Ok(())
    }

    pub fn value_by_identifier(&self, identifier: &str) -> Result<&str> {
        self.command.get_default_value_by_key(identifier)
    }

    fn resolve(&self, pattern: &str) -> Result<PathBuf> {
        let expanded = self.command.construct(pattern, &[])?;
        Ok(canon_join(&self.root_dir, Path::new(&expanded)))
    }

    pub fn add_input(&mut self, pattern: &str) -> Result<()> {
        self.check_unlocked("add_input")?;
        let path = self.resolve(pattern)?;
        self.inputs.insert(path);
        Ok(())
    }

    pub fn add_output(&mut self, pattern: &str) -> Result<()> {
        self.check_unlocked("add_output")?;
        let path = self.resolve(pattern)?;
        self.outputs.insert(path);
        Ok(())
    }

    pub fn add_command(&mut self, pattern: &str, arguments: &[(&str, String)]) -> Result<()> {
        self.check_unlocked("add_command")?;
        let command = self.command.construct(pattern, arguments)?;
        self.commands.push(command);
        Ok(())
    }

    pub fn build(&mut self) -> Result<()> {
        if self.locked {
            return misuse(format!("{}: build() called twice", self.name));
        }
        if self.serialization.load_from_file() {
            tracing::debug!(name = %self.name, "loaded previous build state");
        }
        self.serialization.update_store(|store| {
            *store = GeneratorSchema {
                name: self.name.clone(),
                outputs: self.outputs.clone(),
                commands: self.commands.clone(),
                ..Default::default()
            }
        });
        self.state.lock().unwrap().inputs = self.inputs.clone();
        self.locked = true;
        *self.status.lock().unwrap() = BuildStatus::Scheduled;
        Ok(())
    }

    fn fail(&self, msg: impl std::fmt::Display) {
        tracing::error!(name = %self.name, "{}", msg);
        self.ctx.progress().log(&format!("{}: {}", self.name, msg));
        self.mark_failed();
    }

    fn mark_failed(&self) {
        self.task_state.fail();
        self.ctx.task_state().fail();
    }

    fn should_skip(&self) -> bool {
        if self.ctx.task_state().is_success() && self.task_state.is_success() {
            return false;
        }
        self.task_state.fail();
        true
    }

    /// Verify the inputs and decide whether the commands need to run.
    fn pregenerate(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.inputs.convert(self.ctx.fingerprint())?;

        let mut recheck = Recheck::new(&self.name, self.observer);
        match self.serialization.load() {
            None => recheck.set_dirty(),
            Some(load) => {
                recheck.paths(&load.inputs, state.inputs.internal(), INPUT_EVENTS);
                recheck.changed(&load.outputs, &self.outputs, RecheckEvent::OutputChanged);
                if let Some(missing) = self.outputs.iter().find(|o| !o.exists()) {
                    recheck.trigger_path(RecheckEvent::OutputChanged, missing);
                }
                recheck.changed(
                    load.commands.as_slice(),
                    self.commands.as_slice(),
                    RecheckEvent::CommandChanged,
                );
            }
        }
        state.dirty = recheck.is_dirty();
        let inputs = state.inputs.internal().clone();
        self.serialization.update_store(|store| store.inputs = inputs);
        Ok(())
    }

    fn run_one(&self, index: usize, cmdline: &str) -> bool {
        let message = format!("{}: generate [{}/{}]", self.name, index + 1, self.commands.len());
        self.ctx.run_command(&message, cmdline, None)
    }

    fn generate(&self) -> Result<()> {
        if !self.state.lock().unwrap().dirty {
            return Ok(());
        }
        std::fs::create_dir_all(&self.build_dir)?;
        tracing::info!(name = %self.name, commands = self.commands.len(), "generating");
        if self.parallel {
            self.commands.par_iter().enumerate().for_each(|(i, cmdline)| {
                if self.ctx.task_state().is_success() && !self.run_one(i, cmdline) {
                    self.mark_failed();
                }
            });
        } else {
            for (i, cmdline) in self.commands.iter().enumerate() {
                if !self.run_one(i, cmdline) {
                    self.mark_failed();
                    break;
                }
            }
        }
        Ok(())
    }

    /// Store on success.  A failed run forgets the previous state, so the
    /// next run regenerates everything.
    fn postgenerate(&self) {
        let dirty = self.state.lock().unwrap().dirty;
        if dirty {
            if self.task_state.is_success() {
                if let Err(err) = self.serialization.store_to_file() {
                    self.fail(err);
                }
            } else if let Err(err) = std::fs::remove_file(self.serialization.path()) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("remove {}: {}", self.serialization.path().display(), err);
                }
            }
        }
        let status = if self.task_state.is_success() {
            BuildStatus::Completed
        } else {
            BuildStatus::Failed
        };
        *self.status.lock().unwrap() = status;
    }

    fn run_stage(&self, stage: impl FnOnce() -> Result<()>) {
        if self.should_skip() {
            return;
        }
        if let Err(err) = stage() {
            self.fail(err);
        }
    }
}

impl<'a> Builder for Generator<'a> {
    fn unique_id(&self) -> String {
        self.name.clone()
    }

    fn is_locked(&self) -> bool {
        self.locked
    }

    fn tasks<'t>(&'t self, graph: &mut TaskGraph<'t>) -> Result<(TaskId, TaskId)> {
        if !self.locked {
            return misuse(format!("{}: tasks requested before build()", self.name));
        }
        let pre = graph.add_task(format!("{}:pregenerate", self.name), move || {
            self.run_stage(|| self.pregenerate())
        });
        let gen = graph.add_task(format!("{}:generate", self.name), move || {
            self.run_stage(|| self.generate())
        });
        let post = graph.add_task(format!("{}:postgenerate", self.name), move || {
            self.postgenerate()
        });
        graph.precede(pre, gen)?;
        graph.precede(gen, post)?;
        Ok((pre, post))
    }

    fn task_state(&self) -> TaskState {
        self.task_state.get()
    }

    fn build_dir(&self) -> &Path {
        &self.build_dir
    }
}
