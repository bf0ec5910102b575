//! Error kinds raised while declaring and building targets.
//!
//! Declaration-time errors are returned to the caller, who is expected to
//! abandon the run.  Errors raised inside a running task are logged and
//! folded into the process-wide task state instead; see `env::TaskState`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid toolchain or target configuration, or a malformed command
    /// template.
    #[error("configuration: {0}")]
    Config(String),

    /// A declared input did not exist when it was fingerprinted.
    #[error("{}: not found: {source}", path.display())]
    Fingerprint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A fingerprint-changing mutator was called after `build()`.
    #[error("{name}: {op} called after build()")]
    Locked { name: String, op: &'static str },

    /// The build description is inconsistent (unregistered dependency,
    /// duplicate or cyclic edge, premature accessor call, ...).
    #[error("{0}")]
    Misuse(String),

    /// The build schema could not be written.
    #[error("store {}: {source}", path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn config<T>(msg: impl Into<String>) -> Result<T> {
    Err(Error::Config(msg.into()))
}

pub(crate) fn misuse<T>(msg: impl Into<String>) -> Result<T> {
    Err(Error::Misuse(msg.into()))
}
