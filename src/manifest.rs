//! The build description file: project layout, toolchain, targets and
//! generators, read from TOML.

use crate::path::Fingerprint;
use crate::toolchain::{Executables, TargetType, ToolchainConfig};
use anyhow::{anyhow, bail};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub toolchain: ToolchainSection,
    #[serde(default)]
    pub target: Vec<TargetConfig>,
    #[serde(default)]
    pub generator: Vec<GeneratorConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    /// Relative to the directory holding the manifest.
    pub root: PathBuf,
    /// Relative to the project root.
    pub build: PathBuf,
    pub fingerprint: Fingerprint,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        ProjectConfig {
            root: PathBuf::from("."),
            build: PathBuf::from("build"),
            fingerprint: Fingerprint::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolchainSection {
    pub name: String,
    pub executables: Executables,
    pub config: ToolchainConfig,
}

impl Default for ToolchainSection {
    fn default() -> Self {
        ToolchainSection {
            name: "gcc".to_owned(),
            executables: Executables::default(),
            config: ToolchainConfig::default(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TargetType,
    #[serde(default = "default_root")]
    pub root: PathBuf,

    #[serde(default)]
    pub sources: Vec<PathBuf>,
    #[serde(default)]
    pub glob_sources: Vec<PathBuf>,
    #[serde(default)]
    pub headers: Vec<PathBuf>,
    #[serde(default)]
    pub glob_headers: Vec<PathBuf>,
    #[serde(default)]
    pub pch: Vec<PathBuf>,
    #[serde(default)]
    pub include_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub lib_dirs: Vec<PathBuf>,

    #[serde(default)]
    pub preprocessor_flags: Vec<String>,
    #[serde(default)]
    pub common_compile_flags: Vec<String>,
    #[serde(default)]
    pub pch_compile_flags: Vec<String>,
    #[serde(default)]
    pub pch_object_flags: Vec<String>,
    #[serde(default)]
    pub asm_compile_flags: Vec<String>,
    #[serde(default)]
    pub c_compile_flags: Vec<String>,
    #[serde(default)]
    pub cpp_compile_flags: Vec<String>,
    #[serde(default)]
    pub link_flags: Vec<String>,

    #[serde(default)]
    pub lib_deps: Vec<PathBuf>,
    #[serde(default)]
    pub external_lib_deps: Vec<String>,
    #[serde(default)]
    pub compile_dependencies: Vec<PathBuf>,
    #[serde(default)]
    pub link_dependencies: Vec<PathBuf>,

    /// Targets or generators that must finish first.  Library targets
    /// named here are also linked against.
    #[serde(default)]
    pub deps: Vec<String>,
    /// Run from the target's build directory after a successful build.
    pub test: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratorConfig {
    pub name: String,
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub parallel: bool,
    /// Extra `{identifier}` values for the patterns below.
    #[serde(default)]
    pub args: BTreeMap<String, String>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub deps: Vec<String>,
    pub test: Option<String>,
}

impl Manifest {
    pub fn parse(text: &str) -> anyhow::Result<Manifest> {
        let manifest: Manifest = toml::from_str(text)?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut names = BTreeSet::new();
        for name in self.names() {
            if !names.insert(name) {
                bail!("duplicate target or generator {:?}", name);
            }
        }
        for (name, deps) in self.edges() {
            for dep in deps {
                if !names.contains(dep.as_str()) {
                    bail!("{}: unknown dependency {:?}", name, dep);
                }
            }
        }
        Ok(())
    }

    /// Every target and generator name, targets first.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.target
            .iter()
            .map(|t| t.name.as_str())
            .chain(self.generator.iter().map(|g| g.name.as_str()))
    }

    fn edges(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.target
            .iter()
            .map(|t| (t.name.as_str(), t.deps.as_slice()))
            .chain(self.generator.iter().map(|g| (g.name.as_str(), g.deps.as_slice())))
    }

    pub fn find_target(&self, name: &str) -> Option<&TargetConfig> {
        self.target.iter().find(|t| t.name == name)
    }

    /// The requested names plus everything they transitively depend on.
    /// An empty request selects everything.
    pub fn select(&self, requested: &[String]) -> anyhow::Result<BTreeSet<String>> {
        if requested.is_empty() {
            return Ok(self.names().map(str::to_owned).collect());
        }
        let deps: BTreeMap<&str, &[String]> = self.edges().collect();
        let mut selected = BTreeSet::new();
        let mut stack: Vec<&str> = Vec::new();
        for name in requested {
            if !deps.contains_key(name.as_str()) {
                bail!("unknown target requested: {:?}", name);
            }
            stack.push(name);
        }
        while let Some(name) = stack.pop() {
            if selected.insert(name.to_owned()) {
                stack.extend(deps[name].iter().map(String::as_str));
            }
        }
        Ok(selected)
    }
}

/// Read and validate the build description at `path`.
pub fn load(path: &Path) -> anyhow::Result<Manifest> {
    let text = std::fs::read_to_string(path).map_err(|err| anyhow!("read {:?}: {}", path, err))?;
    Manifest::parse(&text).map_err(|err| anyhow!("{}: {}", path.display(), err))
}
