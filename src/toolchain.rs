//! Toolchain description: executables, file-extension tables and command
//! templates.  Loaded from configuration; the build core only fills the
//! templates in and never interprets compiler flags.

use crate::error::{config, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;

/// Language of a file, by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileExt {
    Asm,
    C,
    Cpp,
    Header,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Executable,
    StaticLibrary,
    DynamicLibrary,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Executable => "executable",
            TargetType::StaticLibrary => "static_library",
            TargetType::DynamicLibrary => "dynamic_library",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Executables {
    pub assembler: String,
    pub c_compiler: String,
    pub cpp_compiler: String,
    pub archiver: String,
    pub linker: String,
}

impl Default for Executables {
    fn default() -> Self {
        Executables {
            assembler: "as".to_owned(),
            c_compiler: "gcc".to_owned(),
            cpp_compiler: "g++".to_owned(),
            archiver: "ar".to_owned(),
            linker: "ld".to_owned(),
        }
    }
}

/// Extension tables and command templates.  Defaults follow gcc.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    pub obj_ext: String,
    pub pch_header_ext: String,
    pub pch_compile_ext: String,
    pub prefix_include_dir: String,
    pub prefix_lib_dir: String,
    /// Put in front of the aggregated pch header in every object compile.
    pub prefix_pch_include: String,

    pub pch_command: String,
    pub compile_command: String,
    pub executable_link_command: String,
    pub static_library_link_command: String,
    pub dynamic_library_link_command: String,

    pub executable_ext: String,
    pub static_library_ext: String,
    pub dynamic_library_ext: String,

    pub valid_c_ext: BTreeSet<String>,
    pub valid_cpp_ext: BTreeSet<String>,
    pub valid_asm_ext: BTreeSet<String>,
    pub valid_header_ext: BTreeSet<String>,
}

fn ext_set(exts: &[&str]) -> BTreeSet<String> {
    exts.iter().map(|e| e.to_string()).collect()
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        ToolchainConfig {
            obj_ext: ".o".to_owned(),
            pch_header_ext: ".h".to_owned(),
            pch_compile_ext: ".gch".to_owned(),
            prefix_include_dir: "-I".to_owned(),
            prefix_lib_dir: "-L".to_owned(),
            prefix_pch_include: "-include ".to_owned(),

            pch_command: "{compiler} {preprocessor_flags} {include_dirs} \
                {common_compile_flags} {pch_compile_flags} {compile_flags} \
                -o {output} -c {input}"
                .to_owned(),
            compile_command: "{compiler} {preprocessor_flags} {include_dirs} \
                {common_compile_flags} {pch_object_flags} {compile_flags} \
                -o {output} -c {input}"
                .to_owned(),
            executable_link_command: "{cpp_compiler} {link_flags} {compiled_sources} \
                -o {output} {lib_dirs} {lib_deps}"
                .to_owned(),
            static_library_link_command: "{archiver} rcs {output} {compiled_sources}".to_owned(),
            dynamic_library_link_command: "{cpp_compiler} -shared {link_flags} \
                {compiled_sources} -o {output}"
                .to_owned(),

            executable_ext: String::new(),
            static_library_ext: ".a".to_owned(),
            dynamic_library_ext: ".so".to_owned(),

            valid_c_ext: ext_set(&[".c"]),
            valid_cpp_ext: ext_set(&[".cpp", ".cxx", ".cc"]),
            valid_asm_ext: ext_set(&[".s", ".S", ".asm"]),
            valid_header_ext: ext_set(&[".h", ".hpp"]),
        }
    }
}

impl ToolchainConfig {
    pub fn file_ext(&self, path: &Path) -> FileExt {
        let ext = match path.extension() {
            None => return FileExt::Invalid,
            Some(ext) => format!(".{}", ext.to_string_lossy()),
        };
        if self.valid_c_ext.contains(&ext) {
            FileExt::C
        } else if self.valid_cpp_ext.contains(&ext) {
            FileExt::Cpp
        } else if self.valid_asm_ext.contains(&ext) {
            FileExt::Asm
        } else if self.valid_header_ext.contains(&ext) {
            FileExt::Header
        } else {
            FileExt::Invalid
        }
    }

    pub fn is_valid_source(&self, path: &Path) -> bool {
        matches!(self.file_ext(path), FileExt::Asm | FileExt::C | FileExt::Cpp)
    }

    pub fn is_valid_header(&self, path: &Path) -> bool {
        self.file_ext(path) == FileExt::Header
    }

    pub fn expects_valid_source(&self, path: &Path) -> Result<()> {
        if !self.is_valid_source(path) {
            return config(format!(
                "{} does not have a valid source extension",
                path.display()
            ));
        }
        Ok(())
    }

    pub fn expects_valid_header(&self, path: &Path) -> Result<()> {
        if !self.is_valid_header(path) {
            return config(format!(
                "{} does not have a valid header extension",
                path.display()
            ));
        }
        Ok(())
    }

    pub fn link_command(&self, kind: TargetType) -> &str {
        match kind {
            TargetType::Executable => &self.executable_link_command,
            TargetType::StaticLibrary => &self.static_library_link_command,
            TargetType::DynamicLibrary => &self.dynamic_library_link_command,
        }
    }

    pub fn target_ext(&self, kind: TargetType) -> &str {
        match kind {
            TargetType::Executable => &self.executable_ext,
            TargetType::StaticLibrary => &self.static_library_ext,
            TargetType::DynamicLibrary => &self.dynamic_library_ext,
        }
    }
}

/// A named toolchain, shared by reference between all targets built with it.
#[derive(Debug, Clone)]
pub struct Toolchain {
    name: String,
    executables: Executables,
    config: ToolchainConfig,
}

impl Toolchain {
    pub fn new(name: impl Into<String>, executables: Executables, config: ToolchainConfig) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.contains(std::path::is_separator) {
            return crate::error::config(format!("invalid toolchain name {:?}", name));
        }
        for template in [
            &config.pch_command,
            &config.compile_command,
            &config.executable_link_command,
            &config.static_library_link_command,
            &config.dynamic_library_link_command,
        ] {
            crate::eval::parse(template)?;
        }
        Ok(Toolchain {
            name,
            executables,
            config,
        })
    }

    /// gcc-style defaults, mostly useful for tests.
    pub fn gcc() -> Self {
        Toolchain {
            name: "gcc".to_owned(),
            executables: Executables::default(),
            config: ToolchainConfig::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn executables(&self) -> &Executables {
        &self.executables
    }

    pub fn config(&self) -> &ToolchainConfig {
        &self.config
    }

    /// Default template arguments naming the executables.
    pub fn arguments(&self) -> [(&'static str, &str); 5] {
        [
            ("asm_compiler", &self.executables.assembler),
            ("c_compiler", &self.executables.c_compiler),
            ("cpp_compiler", &self.executables.cpp_compiler),
            ("archiver", &self.executables.archiver),
            ("linker", &self.executables.linker),
        ]
    }
}
