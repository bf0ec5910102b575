//! Persisted build state.  Each target and generator stores one schema file
//! describing what its last build consumed; the next invocation diffs its
//! current declarations against it.
//!
//! The file is a one-line header naming the format and schema kind followed
//! by a JSON document.  A file whose header or body does not verify is
//! treated as absent, which forces a full rebuild.

use crate::error::{Error, Result};
use crate::path::PathRecordSet;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SIGNATURE: &str = "cc2-schema";
const VERSION: u32 = 1;

/// A record type that can be persisted.
pub trait Schema: Serialize + DeserializeOwned + Default + Clone + Send {
    /// Distinguishes target files from generator files.
    const KIND: &'static str;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,

    pub sources: PathRecordSet,
    pub headers: PathRecordSet,
    pub pchs: PathRecordSet,
    pub lib_deps: PathRecordSet,
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

    pub compile_dependencies: PathRecordSet,
    pub link_dependencies: PathRecordSet,

    pub pch_compiled: bool,
    pub target_linked: bool,
}

impl Schema for TargetSchema {
    const KIND: &'static str = "target";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratorSchema {
    pub name: String,
    pub inputs: PathRecordSet,
    pub outputs: BTreeSet<PathBuf>,
    pub commands: Vec<String>,
}

impl Schema for GeneratorSchema {
    const KIND: &'static str = "generator";
}

fn header<T: Schema>() -> String {
    format!("{} {} {}\n", SIGNATURE, VERSION, T::KIND)
}

/// Structural check: the header matches and the body parses.
pub fn verify<T: Schema>(bytes: &[u8]) -> Option<T> {
    let header = header::<T>();
    let body = bytes.strip_prefix(header.as_bytes())?;
    serde_json::from_slice(body).ok()
}

/// Fails only for paths that are not valid unicode.
pub fn serialize<T: Schema>(schema: &T) -> std::io::Result<Vec<u8>> {
    let mut bytes = header::<T>().into_bytes();
    serde_json::to_writer_pretty(&mut bytes, schema)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// The load/store pair of one target or generator.  `load` is the baseline
/// read at construction and never changes afterwards; `store` accumulates
/// what the current build produced and is written by the end task.
pub struct Serialization<T: Schema> {
    path: PathBuf,
    load: Option<T>,
    store: Mutex<T>,
}

impl<T: Schema> Serialization<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Serialization {
            path: path.into(),
            load: None,
            store: Mutex::new(T::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the previous schema.  Returns false, never an error, when the
    /// file is missing, unreadable or fails verification.
    pub fn load_from_file(&mut self) -> bool {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("read {}: {}", self.path.display(), err);
                }
                return false;
            }
        };
        match verify::<T>(&bytes) {
            Some(schema) => {
                self.load = Some(schema);
                true
            }
            None => {
                tracing::warn!("{}: ignoring corrupt build state", self.path.display());
                false
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.load.is_some()
    }

    pub fn load(&self) -> Option<&T> {
        self.load.as_ref()
    }

    pub fn store(&self) -> MutexGuard<T> {
        self.store.lock().unwrap()
    }

    pub fn update_store(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.store())
    }

    /// Write the store half atomically.
    pub fn store_to_file(&self) -> Result<()> {
        let write = || -> std::io::Result<()> {
            let bytes = serialize(&*self.store())?;
            if let Some(dir) = self.path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            crate::fs::write_atomically(&self.path, &bytes)
        };
        write().map_err(|source| Error::Store {
            path: self.path.clone(),
            source,
        })
    }
}

impl Serialization<TargetSchema> {
    /// Record one successfully compiled (or still up to date) source.  Safe
    /// to call from parallel compile tasks.
    pub fn add_source(&self, record: crate::path::PathRecord) {
        self.store().sources.replace(record);
    }

    /// Copy the PCH-related results into the store, leaving sources alone.
    pub fn update_pch_compiled(&self, headers: &PathRecordSet, pchs: &PathRecordSet, compiled: bool) {
        let mut store = self.store();
        store.headers = headers.clone();
        store.pchs = pchs.clone();
        store.pch_compiled = compiled;
    }

    pub fn update_target_linked(&self, linked: bool) {
        self.store().target_linked = linked;
    }
}
