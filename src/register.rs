//! The registry of everything taking part in one build: targets and
//! generators, the edges between them, and post-build tests.

use crate::env::{Context, TaskState};
use crate::error::{misuse, Result};
use crate::graph::{TaskGraph, TaskId};
use crate::work::Executor;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    /// Still accepting declarations.
    Unbuilt,
    /// Locked; tasks may be registered and run.
    Scheduled,
    Completed,
    Failed,
}

/// Something that contributes a chain of tasks to the build.
pub trait Builder {
    /// Distinguishes builders within one register.
    fn unique_id(&self) -> String;

    fn is_locked(&self) -> bool;

    /// Add this builder's tasks to `graph`, returning the first and last of
    /// them.  Every other task of the builder lies between the two.
    fn tasks<'t>(&'t self, graph: &mut TaskGraph<'t>) -> Result<(TaskId, TaskId)>;

    fn task_state(&self) -> TaskState;

    fn build_dir(&self) -> &Path;
}

struct Entry<'a> {
    builder: &'a dyn Builder,
    first: TaskId,
    last: TaskId,
}

struct TestInfo<'a> {
    builder: &'a dyn Builder,
    command: String,
}

/// Result of executing the registered graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub success: bool,
    /// External commands started during the run.
    pub commands: usize,
}

pub struct Register<'a> {
    ctx: &'a Context,
    graph: TaskGraph<'a>,
    entries: BTreeMap<String, Entry<'a>>,
    tests: Vec<TestInfo<'a>>,
    summary: Option<RunSummary>,
}

impl<'a> Register<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Register {
            ctx,
            graph: TaskGraph::new(),
            entries: BTreeMap::new(),
            tests: Vec::new(),
            summary: None,
        }
    }

    /// Add a locked builder's tasks to the build.
    pub fn build(&mut self, builder: &'a dyn Builder) -> Result<()> {
        let id = builder.unique_id();
        if !builder.is_locked() {
            return misuse(format!("{}: registered before build()", id));
        }
        if self.entries.contains_key(&id) {
            return misuse(format!("{}: registered twice", id));
        }
        let (first, last) = builder.tasks(&mut self.graph)?;
        tracing::debug!(id = %id, "registered");
        self.entries.insert(
            id,
            Entry {
                builder,
                first,
                last,
            },
        );
        Ok(())
    }

    fn entry(&self, builder: &dyn Builder) -> Result<&Entry<'a>> {
        let id = builder.unique_id();
        match self.entries.get(&id) {
            Some(entry) => Ok(entry),
            None => misuse(format!("{} is not registered; call build() first", id)),
        }
    }

    /// `target` starts only after everything of `dependency`, including
    /// its persisted state, has finished.
    pub fn dep(&mut self, target: &dyn Builder, dependency: &dyn Builder) -> Result<()> {
        let first = self.entry(target)?.first;
        let last = self.entry(dependency)?.last;
        self.graph.precede(last, first)
    }

    /// Run `command` from the builder's build directory once the build has
    /// succeeded.
    pub fn test(&mut self, builder: &'a dyn Builder, command: impl Into<String>) -> Result<()> {
        self.entry(builder)?;
        self.tests.push(TestInfo {
            builder,
            command: command.into(),
        });
        Ok(())
    }

    pub fn is_registered(&self, builder: &dyn Builder) -> bool {
        self.entries.contains_key(&builder.unique_id())
    }

    /// Execute the graph and wait for it.  `parallelism` of 0 uses every
    /// hardware thread.
    pub fn run(&mut self, parallelism: usize) -> Result<RunSummary> {
        if self.summary.is_some() {
            return misuse("run() called twice on one register");
        }
        let executor = Executor::new(parallelism)?;
        self.ctx.scope("run", || executor.run(&self.graph));
        let summary = RunSummary {
            success: self.ctx.task_state().is_success()
                && self
                    .entries
                    .values()
                    .all(|e| e.builder.task_state() == TaskState::Success),
            commands: self.ctx.commands_run(),
        };
        self.summary = Some(summary);
        Ok(summary)
    }

    /// Run the registered tests.  Only valid after a successful `run`.
    /// Returns whether every test passed.
    pub fn run_tests(&self) -> Result<bool> {
        match self.summary {
            Some(RunSummary { success: true, .. }) => {}
            Some(_) => return misuse("tests requested after a failed build"),
            None => return misuse("tests requested before the build ran"),
        }
        let mut passed = true;
        for test in &self.tests {
            let message = format!("test {}", test.builder.unique_id());
            if !self
                .ctx
                .run_command(&message, &test.command, Some(test.builder.build_dir()))
            {
                passed = false;
            }
        }
        Ok(passed)
    }

    /// Remove everything the build produced, including persisted state.
    pub fn clean(&self) -> Result<()> {
        clean(self.ctx)
    }
}

pub fn clean(ctx: &Context) -> Result<()> {
    match std::fs::remove_dir_all(ctx.build_dir()) {
        Ok(()) => {
            tracing::info!("removed {}", ctx.build_dir().display());
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::generator::Generator;
    use crate::testing::Space;

    fn generator<'s>(space: &'s Space, name: &str, command: &str) -> Result<Generator<'s>> {
        let mut gen = Generator::new(name, &space.ctx, ".", false)?;
        gen.add_command(command, &[])?;
        gen.build()?;
        Ok(gen)
    }

    #[test]
    fn unbuilt_builders_are_rejected() -> Result<()> {
        let space = Space::new();
        let gen = Generator::new("g", &space.ctx, ".", false)?;
        let mut register = Register::new(&space.ctx);
        assert!(matches!(register.build(&gen), Err(Error::Misuse(_))));
        assert!(!register.is_registered(&gen));
        Ok(())
    }

    #[test]
    fn tests_run_after_success() -> Result<()> {
        let space = Space::new();
        let gen = generator(&space, "g", "echo build")?;
        let mut register = Register::new(&space.ctx);
        register.build(&gen)?;
        register.test(&gen, "echo test")?;
        assert!(matches!(register.run_tests(), Err(Error::Misuse(_))));

        let summary = register.run(2)?;
        assert!(summary.success);
        assert_eq!(summary.commands, 1);
        assert!(register.run_tests()?);
        assert_eq!(space.recorder.commands(), vec!["echo build", "echo test"]);
        assert!(matches!(register.run(1), Err(Error::Misuse(_))));
        Ok(())
    }

    #[test]
    fn no_tests_after_failure() -> Result<()> {
        let space = Space::new();
        space.recorder.fail_matching(Some("false"));
        let bad = generator(&space, "bad", "false")?;
        let after = generator(&space, "after", "echo after")?;
        let mut register = Register::new(&space.ctx);
        register.build(&bad)?;
        register.build(&after)?;
        register.dep(&after, &bad)?;
        register.test(&after, "echo test")?;

        let summary = register.run(1)?;
        assert!(!summary.success);
        // The dependent never starts its commands once the build has failed.
        assert_eq!(space.recorder.commands(), vec!["false"]);
        assert!(matches!(register.run_tests(), Err(Error::Misuse(_))));
        Ok(())
    }

    #[test]
    fn test_requires_registration() -> Result<()> {
        let space = Space::new();
        let gen = generator(&space, "g", "echo")?;
        let mut register = Register::new(&space.ctx);
        assert!(matches!(
            register.test(&gen, "echo test"),
            Err(Error::Misuse(_))
        ));
        Ok(())
    }

    #[test]
    fn clean_removes_build_dir() -> Result<()> {
        let space = Space::new();
        space.write("build/g/g.cc2", "", 100);
        let register = Register::new(&space.ctx);
        register.clean()?;
        assert!(!space.path("build").exists());
        // Cleaning twice is fine.
        register.clean()?;
        Ok(())
    }
}
