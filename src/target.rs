//! C/C++ targets: declaration, change detection per stage and the
//! PCH -> compile -> link -> end task chain.

use crate::canon::{canon_join, path_for_command};
use crate::env::{Context, SharedTaskState, TaskState};
use crate::error::{config, misuse, Error, Result};
use crate::eval::Command;
use crate::graph::{TaskGraph, TaskId};
use crate::path::{PathRecordSet, RelationalPathSet};
use crate::recheck::{Recheck, RecheckObserver, PATH_EVENTS};
use crate::register::{BuildStatus, Builder};
use crate::schema::{Serialization, TargetSchema};
use crate::toolchain::{FileExt, TargetType, Toolchain};
use dashmap::DashMap;
use rayon::prelude::*;
use rustc_hash::FxHasher;
use std::collections::BTreeSet;
use std::fmt::Display;
use std::hash::BuildHasherDefault;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

const PCH_NAME: &str = "cc2_pch";
const SCHEMA_EXT: &str = "cc2";

/// Selects declaration categories for `TargetDeclaration::copy_from` and
/// `insert_from`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOption {
    PreprocessorFlags,
    CommonCompileFlags,
    PchCompileFlags,
    PchObjectFlags,
    AsmCompileFlags,
    CCompileFlags,
    CppCompileFlags,
    LinkFlags,
    CompileDependencies,
    LinkDependencies,
    SourceFiles,
    HeaderFiles,
    PchFiles,
    LibDeps,
    ExternalLibDeps,
    IncludeDirs,
    LibDirs,
}

/// Everything a user declares about a target.  Paths are absolute.
#[derive(Debug, Clone, Default)]
pub struct TargetDeclaration {
    pub sources: RelationalPathSet,
    pub headers: RelationalPathSet,
    pub pchs: RelationalPathSet,
    pub compile_dependencies: RelationalPathSet,
    pub link_dependencies: RelationalPathSet,

    /// Link order matters, so these keep declaration order.
    pub lib_deps: Vec<PathBuf>,
    pub external_lib_deps: Vec<String>,

    pub include_dirs: BTreeSet<PathBuf>,
    pub lib_dirs: BTreeSet<PathBuf>,

    pub preprocessor_flags: Vec<String>,
    pub common_compile_flags: Vec<String>,
    pub pch_compile_flags: Vec<String>,
    pub pch_object_flags: Vec<String>,
    pub asm_compile_flags: Vec<String>,
    pub c_compile_flags: Vec<String>,
    pub cpp_compile_flags: Vec<String>,
    pub link_flags: Vec<String>,
}

fn push_unique<T: PartialEq + Clone>(into: &mut Vec<T>, from: &[T]) {
    for item in from {
        if !into.contains(item) {
            into.push(item.clone());
        }
    }
}

impl TargetDeclaration {
    /// Replace the selected categories with those of `other`.
    pub fn copy_from(&mut self, other: &TargetDeclaration, options: &[SyncOption]) {
        for option in options {
            match option {
                SyncOption::PreprocessorFlags => {
                    self.preprocessor_flags = other.preprocessor_flags.clone()
                }
                SyncOption::CommonCompileFlags => {
                    self.common_compile_flags = other.common_compile_flags.clone()
                }
                SyncOption::PchCompileFlags => {
                    self.pch_compile_flags = other.pch_compile_flags.clone()
                }
                SyncOption::PchObjectFlags => self.pch_object_flags = other.pch_object_flags.clone(),
                SyncOption::AsmCompileFlags => {
                    self.asm_compile_flags = other.asm_compile_flags.clone()
                }
                SyncOption::CCompileFlags => self.c_compile_flags = other.c_compile_flags.clone(),
                SyncOption::CppCompileFlags => {
                    self.cpp_compile_flags = other.cpp_compile_flags.clone()
                }
                SyncOption::LinkFlags => self.link_flags = other.link_flags.clone(),
                SyncOption::CompileDependencies => {
                    self.compile_dependencies = other.compile_dependencies.clone()
                }
                SyncOption::LinkDependencies => {
                    self.link_dependencies = other.link_dependencies.clone()
                }
                SyncOption::SourceFiles => self.sources = other.sources.clone(),
                SyncOption::HeaderFiles => self.headers = other.headers.clone(),
                SyncOption::PchFiles => self.pchs = other.pchs.clone(),
                SyncOption::LibDeps => self.lib_deps = other.lib_deps.clone(),
                SyncOption::ExternalLibDeps => {
                    self.external_lib_deps = other.external_lib_deps.clone()
                }
                SyncOption::IncludeDirs => self.include_dirs = other.include_dirs.clone(),
                SyncOption::LibDirs => self.lib_dirs = other.lib_dirs.clone(),
            }
        }
    }

    /// Merge the selected categories of `other` into this declaration.
    pub fn insert_from(&mut self, other: &TargetDeclaration, options: &[SyncOption]) {
        for option in options {
            match option {
                SyncOption::PreprocessorFlags => {
                    push_unique(&mut self.preprocessor_flags, &other.preprocessor_flags)
                }
                SyncOption::CommonCompileFlags => {
                    push_unique(&mut self.common_compile_flags, &other.common_compile_flags)
                }
                SyncOption::PchCompileFlags => {
                    push_unique(&mut self.pch_compile_flags, &other.pch_compile_flags)
                }
                SyncOption::PchObjectFlags => {
                    push_unique(&mut self.pch_object_flags, &other.pch_object_flags)
                }
                SyncOption::AsmCompileFlags => {
                    push_unique(&mut self.asm_compile_flags, &other.asm_compile_flags)
                }
                SyncOption::CCompileFlags => {
                    push_unique(&mut self.c_compile_flags, &other.c_compile_flags)
                }
                SyncOption::CppCompileFlags => {
                    push_unique(&mut self.cpp_compile_flags, &other.cpp_compile_flags)
                }
                SyncOption::LinkFlags => push_unique(&mut self.link_flags, &other.link_flags),
                SyncOption::CompileDependencies => {
                    self.compile_dependencies.extend(&other.compile_dependencies)
                }
                SyncOption::LinkDependencies => {
                    self.link_dependencies.extend(&other.link_dependencies)
                }
                SyncOption::SourceFiles => self.sources.extend(&other.sources),
                SyncOption::HeaderFiles => self.headers.extend(&other.headers),
                SyncOption::PchFiles => self.pchs.extend(&other.pchs),
                SyncOption::LibDeps => push_unique(&mut self.lib_deps, &other.lib_deps),
                SyncOption::ExternalLibDeps => {
                    push_unique(&mut self.external_lib_deps, &other.external_lib_deps)
                }
                SyncOption::IncludeDirs => {
                    self.include_dirs.extend(other.include_dirs.iter().cloned())
                }
                SyncOption::LibDirs => self.lib_dirs.extend(other.lib_dirs.iter().cloned()),
            }
        }
    }
}

/// The object file produced for one source, and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectData {
    pub output: PathBuf,
    pub command: String,
}

/// Inputs verified while the stages run, plus the dirty bit they share.
#[derive(Default)]
struct StageState {
    sources: RelationalPathSet,
    headers: RelationalPathSet,
    pchs: RelationalPathSet,
    compile_dependencies: RelationalPathSet,
    link_dependencies: RelationalPathSet,
    lib_deps: RelationalPathSet,
    dirty: bool,
    pch_command: Option<String>,
    link_command: Option<String>,
}

type ObjectMap = DashMap<PathBuf, ObjectData, BuildHasherDefault<FxHasher>>;

pub struct Target<'a> {
    name: String,
    kind: TargetType,
    toolchain: &'a Toolchain,
    ctx: &'a Context,
    root_dir: PathBuf,
    build_dir: PathBuf,
    declaration: TargetDeclaration,
    locked: bool,
    command: Command,
    serialization: Serialization<TargetSchema>,
    state: Mutex<StageState>,
    objects: ObjectMap,
    status: Mutex<BuildStatus>,
    task_state: SharedTaskState,
    observer: Option<&'a dyn RecheckObserver>,
}

/// Path of `path` relative to `base`, with `..` where it leaves `base`.
fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let path: Vec<Component> = path.components().collect();
    let base: Vec<Component> = base.components().collect();
    let common = path
        .iter()
        .zip(base.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut rel = PathBuf::new();
    for _ in common..base.len() {
        rel.push("..");
    }
    for c in &path[common..] {
        rel.push(c.as_os_str());
    }
    rel
}

fn join_flags(flags: &[String]) -> String {
    flags.join(" ")
}

fn join_dirs(prefix: &str, dirs: &BTreeSet<PathBuf>) -> String {
    dirs.iter()
        .map(|d| format!("{}{}", prefix, path_for_command(d)))
        .collect::<Vec<_>>()
        .join(" ")
}

impl<'a> Target<'a> {
    /// `root` is the directory sources are declared relative to, itself
    /// relative to the project root unless absolute.
    pub fn new(
        name: impl Into<String>,
        kind: TargetType,
        toolchain: &'a Toolchain,
        ctx: &'a Context,
        root: impl AsRef<Path>,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.contains(std::path::is_separator) {
            return config(format!("invalid target name {:?}", name));
        }
        let root_dir = canon_join(ctx.root_dir(), root.as_ref());
        let build_dir = ctx.build_dir().join(toolchain.name()).join(&name);
        let serialization =
            Serialization::new(build_dir.join(format!("{}.{}", name, SCHEMA_EXT)));
        Ok(Target {
            name,
            kind,
            toolchain,
            ctx,
            root_dir,
            build_dir,
            declaration: TargetDeclaration::default(),
            locked: false,
            command: Command::new(),
            serialization,
            state: Mutex::new(StageState::default()),
            objects: ObjectMap::default(),
            status: Mutex::new(BuildStatus::Unbuilt),
            task_state: SharedTaskState::default(),
            observer: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TargetType {
        self.kind
    }

    pub fn toolchain(&self) -> &Toolchain {
        self.toolchain
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn declaration(&self) -> &TargetDeclaration {
        &self.declaration
    }

    pub fn schema_path(&self) -> &Path {
        self.serialization.path()
    }

    /// The linked output.  Known from the declaration alone, so other
    /// targets may use it as a library dependency before this one is built.
    pub fn target_path(&self) -> PathBuf {
        self.build_dir.join(format!(
            "{}{}",
            self.name,
            self.toolchain.config().target_ext(self.kind)
        ))
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn status(&self) -> BuildStatus {
        *self.status.lock().unwrap()
    }

    pub fn task_state(&self) -> TaskState {
        self.task_state.get()
    }

    /// True once the tasks ran to completion without failure.
    pub fn is_built(&self) -> bool {
        self.status() == BuildStatus::Completed
    }

    pub fn set_observer(&mut self, observer: &'a dyn RecheckObserver) {
        self.observer = Some(observer);
    }

    fn declare(&mut self, op: &'static str) -> Result<&mut TargetDeclaration> {
        if self.locked {
            return Err(Error::Locked {
                name: self.name.clone(),
                op,
            });
        }
        Ok(&mut self.declaration)
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        canon_join(&self.root_dir, path)
    }

    pub fn add_source(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = self.absolute(path.as_ref());
        self.toolchain.config().expects_valid_source(&path)?;
        self.declare("add_source")?.sources.insert(path);
        Ok(())
    }

    pub fn add_header(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = self.absolute(path.as_ref());
        self.toolchain.config().expects_valid_header(&path)?;
        self.declare("add_header")?.headers.insert(path);
        Ok(())
    }

    pub fn add_pch(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = self.absolute(path.as_ref());
        self.toolchain.config().expects_valid_header(&path)?;
        self.declare("add_pch")?.pchs.insert(path);
        Ok(())
    }

    /// Entries of `dir` (not recursive) accepted by `filter`, sorted.
    fn glob(&self, dir: &Path, filter: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>> {
        let dir = self.absolute(dir);
        let entries = std::fs::read_dir(&dir)
            .map_err(|err| Error::Config(format!("glob {}: {}", dir.display(), err)))?;
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && filter(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    pub fn glob_sources(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        let toolchain = self.toolchain;
        let config = toolchain.config();
        for path in self.glob(dir.as_ref(), |p| config.is_valid_source(p))? {
            self.declare("glob_sources")?.sources.insert(path);
        }
        Ok(())
    }

    pub fn glob_headers(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        let toolchain = self.toolchain;
        let config = toolchain.config();
        for path in self.glob(dir.as_ref(), |p| config.is_valid_header(p))? {
            self.declare("glob_headers")?.headers.insert(path);
        }
        Ok(())
    }

    pub fn add_include_dir(&mut self, dir: impl AsRef<Path>, glob_headers: bool) -> Result<()> {
        let abs = self.absolute(dir.as_ref());
        self.declare("add_include_dir")?.include_dirs.insert(abs.clone());
        if glob_headers {
            self.glob_headers(abs)?;
        }
        Ok(())
    }

    pub fn add_lib_dir(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        let abs = self.absolute(dir.as_ref());
        self.declare("add_lib_dir")?.lib_dirs.insert(abs);
        Ok(())
    }

    pub fn add_lib_dep(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let abs = self.absolute(path.as_ref());
        push_unique(&mut self.declare("add_lib_dep")?.lib_deps, &[abs]);
        Ok(())
    }

    /// Link against the output of another target.  Ordering between the two
    /// is a separate `Register::dep`.
    pub fn add_lib_dep_target(&mut self, lib: &Target) -> Result<()> {
        let path = lib.target_path();
        push_unique(&mut self.declare("add_lib_dep")?.lib_deps, &[path]);
        Ok(())
    }

    pub fn add_external_lib_dep(&mut self, lib: impl Into<String>) -> Result<()> {
        let lib = lib.into();
        push_unique(&mut self.declare("add_external_lib_dep")?.external_lib_deps, &[lib]);
        Ok(())
    }

    fn add_flag(
        &mut self,
        op: &'static str,
        select: fn(&mut TargetDeclaration) -> &mut Vec<String>,
        flag: String,
    ) -> Result<()> {
        push_unique(select(self.declare(op)?), &[flag]);
        Ok(())
    }

    pub fn add_preprocessor_flag(&mut self, flag: impl Into<String>) -> Result<()> {
        self.add_flag("add_preprocessor_flag", |d| &mut d.preprocessor_flags, flag.into())
    }

    pub fn add_common_compile_flag(&mut self, flag: impl Into<String>) -> Result<()> {
        self.add_flag("add_common_compile_flag", |d| &mut d.common_compile_flags, flag.into())
    }

    pub fn add_pch_compile_flag(&mut self, flag: impl Into<String>) -> Result<()> {
        self.add_flag("add_pch_compile_flag", |d| &mut d.pch_compile_flags, flag.into())
    }

    pub fn add_pch_object_flag(&mut self, flag: impl Into<String>) -> Result<()> {
        self.add_flag("add_pch_object_flag", |d| &mut d.pch_object_flags, flag.into())
    }

    pub fn add_asm_compile_flag(&mut self, flag: impl Into<String>) -> Result<()> {
        self.add_flag("add_asm_compile_flag", |d| &mut d.asm_compile_flags, flag.into())
    }

    pub fn add_c_compile_flag(&mut self, flag: impl Into<String>) -> Result<()> {
        self.add_flag("add_c_compile_flag", |d| &mut d.c_compile_flags, flag.into())
    }

    pub fn add_cpp_compile_flag(&mut self, flag: impl Into<String>) -> Result<()> {
        self.add_flag("add_cpp_compile_flag", |d| &mut d.cpp_compile_flags, flag.into())
    }

    pub fn add_link_flag(&mut self, flag: impl Into<String>) -> Result<()> {
        self.add_flag("add_link_flag", |d| &mut d.link_flags, flag.into())
    }

    pub fn add_compile_dependency(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let abs = self.absolute(path.as_ref());
        self.declare("add_compile_dependency")?
            .compile_dependencies
            .insert(abs);
        Ok(())
    }

    pub fn add_link_dependency(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let abs = self.absolute(path.as_ref());
        self.declare("add_link_dependency")?
            .link_dependencies
            .insert(abs);
        Ok(())
    }

    pub fn copy(&mut self, other: &TargetDeclaration, options: &[SyncOption]) -> Result<()> {
        self.declare("copy")?.copy_from(other, options);
        Ok(())
    }

    pub fn insert(&mut self, other: &TargetDeclaration, options: &[SyncOption]) -> Result<()> {
        self.declare("insert")?.insert_from(other, options);
        Ok(())
    }

    fn contains_cpp(&self) -> bool {
        let config = self.toolchain.config();
        self.declaration
            .sources
            .user()
            .iter()
            .any(|s| config.file_ext(s) == FileExt::Cpp)
    }

    /// Where the object file of `source` goes: the build directory mirrors
    /// the source tree below the target root.
    pub fn object_path_for(&self, source: &Path) -> PathBuf {
        let rel = relative_to(source, &self.root_dir);
        let mut out = self.build_dir.clone();
        let mut escaped = false;
        if let Some(parent) = rel.parent() {
            for c in parent.components() {
                if c == Component::ParentDir {
                    escaped = true;
                    out.push("__");
                } else {
                    out.push(c.as_os_str());
                }
            }
        }
        if escaped {
            tracing::warn!(
                name = %self.name,
                "{} is outside the target root {}",
                source.display(),
                self.root_dir.display()
            );
        }
        let file_name = source
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        out.push(format!("{}{}", file_name, self.toolchain.config().obj_ext));
        out
    }

    fn pch_header_path(&self) -> PathBuf {
        self.build_dir
            .join(format!("{}{}", PCH_NAME, self.toolchain.config().pch_header_ext))
    }

    fn pch_source_path(&self) -> PathBuf {
        let ext = if self.contains_cpp() { "cpp" } else { "c" };
        self.build_dir.join(format!("{}.{}", PCH_NAME, ext))
    }

    fn pch_compiled_path(&self) -> PathBuf {
        let header = self.pch_header_path();
        let mut name = header.into_os_string();
        name.push(&self.toolchain.config().pch_compile_ext);
        PathBuf::from(name)
    }

    /// The declared pch object flags, preceded by the include of the
    /// aggregated header when the target has a pch.
    fn pch_object_flags(&self) -> String {
        let decl = &self.declaration;
        if decl.pchs.is_empty() {
            return join_flags(&decl.pch_object_flags);
        }
        let include = format!(
            "{}{}",
            self.toolchain.config().prefix_pch_include,
            path_for_command(&self.pch_header_path())
        );
        std::iter::once(include)
            .chain(decl.pch_object_flags.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Lock the declaration, load the previous build state and prepare the
    /// default command arguments.  Further mutators return `Error::Locked`.
    pub fn build(&mut self) -> Result<()> {
        if self.locked {
            return misuse(format!("{}: build() called twice", self.name));
        }
        if self.declaration.sources.is_empty() {
            return config(format!("{}: no sources declared", self.name));
        }

        let decl = &self.declaration;
        let cfg = self.toolchain.config();
        let mut command = Command::new();
        command.add_default_arguments(self.toolchain.arguments());
        command.add_default_arguments([
            ("project_root_dir", path_for_command(self.ctx.root_dir())),
            ("project_build_dir", path_for_command(self.ctx.build_dir())),
            ("target_root_dir", path_for_command(&self.root_dir)),
            ("target_build_dir", path_for_command(&self.build_dir)),
            ("preprocessor_flags", join_flags(&decl.preprocessor_flags)),
            ("common_compile_flags", join_flags(&decl.common_compile_flags)),
            ("pch_compile_flags", join_flags(&decl.pch_compile_flags)),
            ("pch_object_flags", self.pch_object_flags()),
            ("asm_compile_flags", join_flags(&decl.asm_compile_flags)),
            ("c_compile_flags", join_flags(&decl.c_compile_flags)),
            ("cpp_compile_flags", join_flags(&decl.cpp_compile_flags)),
            ("link_flags", join_flags(&decl.link_flags)),
            ("include_dirs", join_dirs(&cfg.prefix_include_dir, &decl.include_dirs)),
            ("lib_dirs", join_dirs(&cfg.prefix_lib_dir, &decl.lib_dirs)),
        ]);

        // Surface unknown placeholders now rather than in the middle of a run.
        let blanks = |keys: &[&'static str]| -> Vec<(&'static str, String)> {
            keys.iter().map(|k| (*k, String::new())).collect()
        };
        command.construct(
            &cfg.compile_command,
            &blanks(&["compiler", "compile_flags", "output", "input"]),
        )?;
        if !decl.pchs.is_empty() {
            command.construct(
                &cfg.pch_command,
                &blanks(&["compiler", "compile_flags", "output", "input", "input_source"]),
            )?;
        }
        command.construct(
            cfg.link_command(self.kind),
            &blanks(&["output", "compiled_sources", "lib_deps"]),
        )?;
        self.command = command;

        if self.serialization.load_from_file() {
            tracing::debug!(name = %self.name, "loaded previous build state");
        } else {
            tracing::debug!(name = %self.name, "no previous build state");
        }
        self.serialization.update_store(|store| {
            *store = TargetSchema {
                name: self.name.clone(),
                kind: self.kind.as_str().to_owned(),
                external_lib_deps: decl.external_lib_deps.clone(),
                include_dirs: decl.include_dirs.clone(),
                lib_dirs: decl.lib_dirs.clone(),
                preprocessor_flags: decl.preprocessor_flags.clone(),
                common_compile_flags: decl.common_compile_flags.clone(),
                pch_compile_flags: decl.pch_compile_flags.clone(),
                pch_object_flags: decl.pch_object_flags.clone(),
                asm_compile_flags: decl.asm_compile_flags.clone(),
                c_compile_flags: decl.c_compile_flags.clone(),
                cpp_compile_flags: decl.cpp_compile_flags.clone(),
                link_flags: decl.link_flags.clone(),
                ..Default::default()
            }
        });

        let mut state = self.state.lock().unwrap();
        *state = StageState {
            sources: decl.sources.clone(),
            headers: decl.headers.clone(),
            pchs: decl.pchs.clone(),
            compile_dependencies: decl.compile_dependencies.clone(),
            link_dependencies: decl.link_dependencies.clone(),
            ..Default::default()
        };
        for lib in &decl.lib_deps {
            state.lib_deps.insert(lib);
        }
        drop(state);

        self.locked = true;
        *self.status.lock().unwrap() = BuildStatus::Scheduled;
        Ok(())
    }

    fn require_executed(&self, what: &str) -> Result<()> {
        match self.status() {
            BuildStatus::Completed | BuildStatus::Failed => Ok(()),
            _ => misuse(format!("{}: {} queried before the build ran", self.name, what)),
        }
    }

    /// The object file and compile command of one declared source.
    pub fn object_data(&self, source: impl AsRef<Path>) -> Result<ObjectData> {
        self.require_executed("object data")?;
        let source = self.absolute(source.as_ref());
        match self.objects.get(&source) {
            Some(data) => Ok(data.value().clone()),
            None => misuse(format!("{}: no object for {}", self.name, source.display())),
        }
    }

    pub fn compile_command(&self, source: impl AsRef<Path>) -> Result<String> {
        Ok(self.object_data(source)?.command)
    }

    pub fn link_command(&self) -> Result<String> {
        self.require_executed("link command")?;
        match &self.state.lock().unwrap().link_command {
            Some(cmd) => Ok(cmd.clone()),
            None => misuse(format!("{}: link stage did not run", self.name)),
        }
    }

    pub fn pch_command(&self) -> Result<String> {
        self.require_executed("pch command")?;
        match &self.state.lock().unwrap().pch_command {
            Some(cmd) => Ok(cmd.clone()),
            None => misuse(format!("{}: no pch stage", self.name)),
        }
    }

    /// Record a task-time failure; the rest of this target and every task
    /// that has not started yet will skip their work.
    fn mark_failed(&self) {
        self.task_state.fail();
        self.ctx.task_state().fail();
    }

    fn fail(&self, msg: impl Display) {
        tracing::error!(name = %self.name, "{}", msg);
        self.ctx.progress().log(&format!("{}: {}", self.name, msg));
        self.mark_failed();
    }

    /// Whether a stage must skip its work because something already failed.
    fn should_skip(&self) -> bool {
        if self.ctx.task_state().is_success() && self.task_state.is_success() {
            return false;
        }
        self.task_state.fail();
        true
    }

    fn recheck(&self, dirty: bool) -> Recheck {
        let mut recheck = Recheck::new(&self.name, self.observer);
        if dirty || !self.serialization.is_loaded() {
            recheck.set_dirty();
        }
        recheck
    }

    fn run_stage(&self, stage: impl FnOnce() -> Result<()>) {
        if self.should_skip() {
            return;
        }
        if let Err(err) = stage() {
            self.fail(err);
        }
    }

    fn pch_stage(&self) -> Result<()> {
        let fingerprint = self.ctx.fingerprint();
        let mut state = self.state.lock().unwrap();
        state.headers.convert(fingerprint)?;
        state.pchs.convert(fingerprint)?;

        let decl = &self.declaration;
        let mut recheck = self.recheck(state.dirty);
        if let Some(load) = self.serialization.load() {
            recheck.flags(&load.preprocessor_flags, &decl.preprocessor_flags);
            recheck.flags(&load.common_compile_flags, &decl.common_compile_flags);
            recheck.flags(&load.pch_compile_flags, &decl.pch_compile_flags);
            recheck.flags(&load.c_compile_flags, &decl.c_compile_flags);
            recheck.flags(&load.cpp_compile_flags, &decl.cpp_compile_flags);
            recheck.dirs(&load.include_dirs, &decl.include_dirs);
            recheck.paths(&load.headers, state.headers.internal(), PATH_EVENTS);
            recheck.paths(&load.pchs, state.pchs.internal(), PATH_EVENTS);
            if !load.pch_compiled {
                recheck.set_dirty();
            }
        }
        state.dirty = recheck.is_dirty();

        let header = self.pch_header_path();
        let source = self.pch_source_path();
        let output = self.pch_compiled_path();
        let (compiler, flags) = if self.contains_cpp() {
            (&self.toolchain.executables().cpp_compiler, "cpp_compile_flags")
        } else {
            (&self.toolchain.executables().c_compiler, "c_compile_flags")
        };
        let cmdline = self.command.construct(
            &self.toolchain.config().pch_command,
            &[
                ("compiler", compiler.clone()),
                (
                    "compile_flags",
                    self.command.get_default_value_by_key(flags)?.to_owned(),
                ),
                ("output", path_for_command(&output)),
                ("input", path_for_command(&header)),
                ("input_source", path_for_command(&source)),
            ],
        )?;
        state.pch_command = Some(cmdline.clone());

        let compiled = if state.dirty {
            std::fs::create_dir_all(&self.build_dir)?;
            let mut contents = String::new();
            for pch in state.pchs.internal() {
                contents.push_str(&format!("#include \"{}\"\n", pch.pathname.display()));
            }
            crate::fs::write_atomically(&header, contents.as_bytes())?;
            if !source.exists() {
                std::fs::write(&source, "")?;
            }
            tracing::info!(name = %self.name, "compiling pch");
            self.ctx.run_command(
                &format!("{}: pch {}", self.name, header.display()),
                &cmdline,
                None,
            )
        } else {
            // Clean implies the previous build compiled it.
            true
        };
        self.serialization
            .update_pch_compiled(state.headers.internal(), state.pchs.internal(), compiled);
        if !compiled {
            self.mark_failed();
        }
        Ok(())
    }

    fn compile_command_for(&self, source: &Path, output: &Path) -> Result<String> {
        let exes = self.toolchain.executables();
        let (compiler, flags) = match self.toolchain.config().file_ext(source) {
            FileExt::Asm => (&exes.assembler, "asm_compile_flags"),
            FileExt::C => (&exes.c_compiler, "c_compile_flags"),
            FileExt::Cpp => (&exes.cpp_compiler, "cpp_compile_flags"),
            FileExt::Header | FileExt::Invalid => {
                return config(format!("{} is not a source", source.display()))
            }
        };
        self.command.construct(
            &self.toolchain.config().compile_command,
            &[
                ("compiler", compiler.clone()),
                (
                    "compile_flags",
                    self.command.get_default_value_by_key(flags)?.to_owned(),
                ),
                ("output", path_for_command(output)),
                ("input", path_for_command(source)),
            ],
        )
    }

    fn compile_stage(&self) -> Result<()> {
        let fingerprint = self.ctx.fingerprint();
        let mut state = self.state.lock().unwrap();
        state.sources.convert(fingerprint)?;
        state.headers.convert(fingerprint)?;
        state.compile_dependencies.convert(fingerprint)?;

        let decl = &self.declaration;
        let mut recheck = self.recheck(state.dirty);
        let empty = PathRecordSet::new();
        let previous_sources = match self.serialization.load() {
            Some(load) => {
                recheck.flags(&load.preprocessor_flags, &decl.preprocessor_flags);
                recheck.flags(&load.common_compile_flags, &decl.common_compile_flags);
                recheck.flags(&load.pch_object_flags, &decl.pch_object_flags);
                recheck.flags(&load.asm_compile_flags, &decl.asm_compile_flags);
                recheck.flags(&load.c_compile_flags, &decl.c_compile_flags);
                recheck.flags(&load.cpp_compile_flags, &decl.cpp_compile_flags);
                recheck.dirs(&load.include_dirs, &decl.include_dirs);
                recheck.paths(&load.headers, state.headers.internal(), PATH_EVENTS);
                recheck.paths(
                    &load.compile_dependencies,
                    state.compile_dependencies.internal(),
                    PATH_EVENTS,
                );
                &load.sources
            }
            None => &empty,
        };
        let selection = recheck.sources(previous_sources, state.sources.internal());
        state.dirty = recheck.is_dirty();

        self.serialization.update_store(|store| {
            store.headers = state.headers.internal().clone();
            store.compile_dependencies = state.compile_dependencies.internal().clone();
        });

        for record in state.sources.internal() {
            let output = self.object_path_for(&record.pathname);
            let command = self.compile_command_for(&record.pathname, &output)?;
            self.objects
                .insert(record.pathname.clone(), ObjectData { output, command });
        }
        for source in &selection.dummy {
            if let Some(record) = state.sources.internal().get(source.as_path()) {
                self.serialization.add_source(record.clone());
            }
        }
        let records = state.sources.internal().clone();
        drop(state);

        if !selection.compile.is_empty() {
            tracing::info!(name = %self.name, count = selection.compile.len(), "compiling");
        }
        selection.compile.par_iter().for_each(|source| {
            if !self.ctx.task_state().is_success() {
                return;
            }
            let Some(data) = self.objects.get(source).map(|d| d.value().clone()) else {
                return;
            };
            if let Some(dir) = data.output.parent() {
                if let Err(err) = std::fs::create_dir_all(dir) {
                    self.fail(format!("create {}: {}", dir.display(), err));
                    return;
                }
            }
            let message = format!("{}: compile {}", self.name, source.display());
            if self.ctx.run_command(&message, &data.command, None) {
                if let Some(record) = records.get(source.as_path()) {
                    self.serialization.add_source(record.clone());
                }
            } else {
                self.mark_failed();
            }
        });
        Ok(())
    }

    fn link_stage(&self) -> Result<()> {
        let fingerprint = self.ctx.fingerprint();
        let mut state = self.state.lock().unwrap();
        state.link_dependencies.convert(fingerprint)?;
        state.lib_deps.convert(fingerprint)?;

        let decl = &self.declaration;
        let mut recheck = self.recheck(state.dirty);
        if let Some(load) = self.serialization.load() {
            recheck.flags(&load.link_flags, &decl.link_flags);
            recheck.dirs(&load.lib_dirs, &decl.lib_dirs);
            recheck.external_libs(&load.external_lib_deps, &decl.external_lib_deps);
            recheck.paths(
                &load.link_dependencies,
                state.link_dependencies.internal(),
                PATH_EVENTS,
            );
            recheck.paths(&load.lib_deps, state.lib_deps.internal(), PATH_EVENTS);
            if !load.target_linked {
                recheck.set_dirty();
            }
        }
        state.dirty = recheck.is_dirty();

        self.serialization.update_store(|store| {
            store.link_dependencies = state.link_dependencies.internal().clone();
            store.lib_deps = state.lib_deps.internal().clone();
        });

        let mut objects = Vec::new();
        for record in state.sources.internal() {
            if let Some(data) = self.objects.get(&record.pathname) {
                objects.push(path_for_command(&data.output));
            }
        }
        let mut lib_deps: Vec<String> = decl.lib_deps.iter().map(|l| path_for_command(l)).collect();
        lib_deps.extend(decl.external_lib_deps.iter().cloned());
        let output = self.target_path();
        let cmdline = self.command.construct(
            self.toolchain.config().link_command(self.kind),
            &[
                ("output", path_for_command(&output)),
                ("compiled_sources", objects.join(" ")),
                ("lib_deps", lib_deps.join(" ")),
            ],
        )?;
        state.link_command = Some(cmdline.clone());
        let dirty = state.dirty;
        drop(state);

        let linked = if dirty {
            std::fs::create_dir_all(&self.build_dir)?;
            tracing::info!(name = %self.name, "linking");
            self.ctx.run_command(
                &format!("{}: link {}", self.name, output.display()),
                &cmdline,
                None,
            )
        } else {
            true
        };
        self.serialization.update_target_linked(linked);
        if !linked {
            self.mark_failed();
        }
        Ok(())
    }

    /// Persist what this build achieved and settle the final status.  Runs
    /// even after a failure so that partial progress is kept.
    fn end_stage(&self) {
        let dirty = self.state.lock().unwrap().dirty;
        if dirty {
            if let Err(err) = self.serialization.store_to_file() {
                self.fail(err);
            }
        }
        let status = if self.task_state.is_success() {
            BuildStatus::Completed
        } else {
            BuildStatus::Failed
        };
        tracing::debug!(name = %self.name, ?status, dirty, "finished");
        *self.status.lock().unwrap() = status;
    }
}

impl<'a> Builder for Target<'a> {
    fn unique_id(&self) -> String {
        format!("{}_{}", self.toolchain.name(), self.name)
    }

    fn is_locked(&self) -> bool {
        self.locked
    }

    fn tasks<'t>(&'t self, graph: &mut TaskGraph<'t>) -> Result<(TaskId, TaskId)> {
        if !self.locked {
            return misuse(format!("{}: tasks requested before build()", self.name));
        }
        let id = self.unique_id();
        let pch = if self.declaration.pchs.is_empty() {
            None
        } else {
            Some(graph.add_task(format!("{}:pch", id), move || {
                self.run_stage(|| self.pch_stage())
            }))
        };
        let compile = graph.add_task(format!("{}:compile", id), move || {
            self.run_stage(|| self.compile_stage())
        });
        let link = graph.add_task(format!("{}:link", id), move || {
            self.run_stage(|| self.link_stage())
        });
        let end = graph.add_task(format!("{}:end", id), move || self.end_stage());
        if let Some(pch) = pch {
            graph.precede(pch, compile)?;
        }
        graph.precede(compile, link)?;
        graph.precede(link, end)?;
        Ok((pch.unwrap_or(compile), end))
    }

    fn task_state(&self) -> TaskState {
        self.task_state.get()
    }

    fn build_dir(&self) -> &Path {
        &self.build_dir
    }
}
