//! Fingerprinted paths: a file plus the token used to notice it changed.

use crate::canon::canon_path;
use crate::error::{Error, Result};
use crate::fs::{hash_content, stat, MTime};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// How the change token of a path is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fingerprint {
    /// Last write time only.
    #[default]
    Timestamp,
    /// Last write time plus a hash of the content; only the hash is compared.
    Content,
}

/// One filesystem entity and its change token.
///
/// Identity is the pathname: two records for the same path with different
/// timestamps are the same entity at different generations.  Ordering and
/// hashing follow that, so sets of records are keyed by path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathRecord {
    pub pathname: PathBuf,
    pub last_write_timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<u64>,
}

impl PathRecord {
    /// A record for a path that has not been materialized yet.  Never touches
    /// the filesystem.
    pub fn create_new(path: impl AsRef<Path>, last_write_timestamp: u64) -> Self {
        PathRecord {
            pathname: canon_path(path),
            last_write_timestamp,
            hash: None,
        }
    }

    /// Stat an existing path; absence is a fingerprint error.
    pub fn create_existing(path: impl AsRef<Path>, fingerprint: Fingerprint) -> Result<Self> {
        let pathname = canon_path(path);
        let not_found = |source| Error::Fingerprint {
            path: pathname.clone(),
            source,
        };
        let last_write_timestamp = match stat(&pathname).map_err(not_found)? {
            MTime::Stamp(t) => t,
            MTime::Missing => {
                return Err(not_found(std::io::Error::from(
                    std::io::ErrorKind::NotFound,
                )))
            }
        };
        let hash = match fingerprint {
            Fingerprint::Timestamp => None,
            Fingerprint::Content => Some(hash_content(&pathname).map_err(not_found)?),
        };
        Ok(PathRecord {
            pathname,
            last_write_timestamp,
            hash,
        })
    }

    /// True if `self` is a later generation of `previous` with a different
    /// change token.  Content hashes win over timestamps when both sides have
    /// one.
    pub fn is_updated_from(&self, previous: &PathRecord) -> bool {
        match (self.hash, previous.hash) {
            (Some(a), Some(b)) => a != b,
            _ => self.last_write_timestamp != previous.last_write_timestamp,
        }
    }
}

impl PartialEq for PathRecord {
    fn eq(&self, other: &Self) -> bool {
        self.pathname == other.pathname
    }
}
impl Eq for PathRecord {}

impl PartialOrd for PathRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PathRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.pathname.cmp(&other.pathname)
    }
}
impl std::hash::Hash for PathRecord {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.pathname.hash(state)
    }
}
impl Borrow<Path> for PathRecord {
    fn borrow(&self) -> &Path {
        &self.pathname
    }
}

pub type PathRecordSet = BTreeSet<PathRecord>;

/// A named group of inputs as declared by the user (`user`), plus the
/// verified form (`internal`) computed once the paths are expected to exist.
#[derive(Debug, Clone, Default)]
pub struct RelationalPathSet {
    user: BTreeSet<PathBuf>,
    internal: PathRecordSet,
    converted: bool,
}

impl RelationalPathSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl AsRef<Path>) {
        self.user.insert(canon_path(path));
    }

    pub fn extend(&mut self, other: &RelationalPathSet) {
        self.user.extend(other.user.iter().cloned());
    }

    pub fn user(&self) -> &BTreeSet<PathBuf> {
        &self.user
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_empty()
    }

    pub fn len(&self) -> usize {
        self.user.len()
    }

    /// Stat every declared path.  Runs once; later calls are no-ops.
    pub fn convert(&mut self, fingerprint: Fingerprint) -> Result<()> {
        if self.converted {
            return Ok(());
        }
        let mut internal = PathRecordSet::new();
        for path in &self.user {
            internal.insert(PathRecord::create_existing(path, fingerprint)?);
        }
        self.internal = internal;
        self.converted = true;
        Ok(())
    }

    pub fn is_converted(&self) -> bool {
        self.converted
    }

    /// The verified records.  Only meaningful after `convert`.
    pub fn internal(&self) -> &PathRecordSet {
        debug_assert!(self.converted, "internal() queried before convert()");
        &self.internal
    }
}

/// Per-path classification of a current set against a previous one.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PathDiff {
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub updated: Vec<PathBuf>,
    pub unchanged: Vec<PathBuf>,
}

impl PathDiff {
    pub fn is_clean(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Compare two generations of a record set, keyed by pathname.
pub fn diff(previous: &PathRecordSet, current: &PathRecordSet) -> PathDiff {
    let mut result = PathDiff::default();
    for record in previous {
        if !current.contains(record.pathname.as_path()) {
            result.removed.push(record.pathname.clone());
        }
    }
    for record in current {
        match previous.get(record.pathname.as_path()) {
            None => result.added.push(record.pathname.clone()),
            Some(prev) if record.is_updated_from(prev) => {
                result.updated.push(record.pathname.clone())
            }
            Some(_) => result.unchanged.push(record.pathname.clone()),
        }
    }
    result
}
