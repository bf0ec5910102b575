//! Filesystem access used for fingerprinting and persisting state.

use std::hash::Hasher;
use std::io::Write;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// MTime info gathered for a file.  This also models "file is absent".
/// It's not using an Option<> just because it makes the code using it easier
/// to follow.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MTime {
    Missing,
    /// Nanoseconds since the unix epoch.
    Stamp(u64),
}

/// stat() an on-disk path, producing its MTime.
pub fn stat(path: &Path) -> std::io::Result<MTime> {
    Ok(match std::fs::metadata(path) {
        Ok(meta) => {
            let modified = meta.modified()?;
            let nanos = modified
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0);
            MTime::Stamp(nanos)
        }
        Err(err) => {
            if err.kind() == std::io::ErrorKind::NotFound {
                MTime::Missing
            } else {
                return Err(err);
            }
        }
    })
}

/// Hash a file's content.  FxHasher is deterministic across runs, which
/// matters because the result is persisted.
pub fn hash_content(path: &Path) -> std::io::Result<u64> {
    let bytes = std::fs::read(path)?;
    let mut hasher = rustc_hash::FxHasher::default();
    hasher.write(&bytes);
    hasher.write_usize(bytes.len());
    Ok(hasher.finish())
}

/// Write `content` to `path` such that readers see either the old or the new
/// file, never a partial one: the bytes go to a temporary file in the same
/// directory which is then renamed over the destination.
pub fn write_atomically(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}
