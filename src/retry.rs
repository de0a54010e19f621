//! Retry wrappers for destructive filesystem operations
//!
//! Antivirus scanners and indexers hold short-lived handles on freshly
//! written files; a brief retry loop absorbs the resulting sharing
//! violations. Each primitive makes five attempts with delays of 0, 100,
//! 200, 300 and 400 ms. Rename additionally falls back to a two-phase move
//! through an intermediate path when the direct loop is exhausted, which
//! breaks deadlocks where both the source and the destination are briefly
//! contested.

use crate::error::{HoloError, Result};
use crate::identity;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::debug;

const RETRY_DELAYS_MS: [u64; 5] = [0, 100, 200, 300, 400];

fn attempt<F>(mut op: F) -> io::Result<()>
where
    F: FnMut() -> io::Result<()>,
{
    let mut last = io::Error::new(io::ErrorKind::Other, "no attempt made");
    for delay in RETRY_DELAYS_MS {
        thread::sleep(Duration::from_millis(delay));
        match op() {
            Ok(()) => return Ok(()),
            Err(err) => last = err,
        }
    }
    Err(last)
}

fn remove_failure(context: &str, source: io::Error) -> HoloError {
    let id = identity::get();
    HoloError::RemoveFailure {
        context: context.to_string(),
        controller: id.controller.clone(),
        space: id.space.clone(),
        source,
    }
}

/// Remove a file, retrying transient failures.
pub fn try_remove(context: &str, target: &Path) -> Result<()> {
    attempt(|| fs::remove_file(target)).map_err(|source| remove_failure(context, source))
}

/// Remove a directory tree, retrying transient failures.
pub fn try_remove_all(context: &str, target: &Path) -> Result<()> {
    attempt(|| fs::remove_dir_all(target)).map_err(|source| remove_failure(context, source))
}

/// Intermediate path for the two-phase rename: `<source>.<pid>_<4-hex>`.
fn intermediate_for(source: &Path) -> PathBuf {
    PathBuf::from(format!(
        "{}.{}_{:04x}",
        source.display(),
        std::process::id(),
        rand::random::<u16>()
    ))
}

/// Rename `source` to `target`, retrying transient failures.
///
/// After the primary loop is exhausted the source is moved to an
/// intermediate sibling path and the loop is run once more from there. The
/// final error names which leg failed: `origin == "source"` when the
/// intermediate hop itself could not be taken, `"target"` when the hop
/// succeeded but the destination still refused the rename; in that case
/// the file is left at the intermediate path.
pub fn try_rename(context: &str, source: &Path, target: &Path) -> Result<()> {
    let mut last = match attempt(|| fs::rename(source, target)) {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };
    debug!(
        "heads up: rename about to fail [{:?} -> {:?}], reason: {}",
        source, target, last
    );
    let mut origin = "source";
    let intermediate = intermediate_for(source);
    let mut from = source;
    if fs::rename(source, &intermediate).is_ok() {
        from = &intermediate;
        origin = "target";
    }
    match attempt(|| fs::rename(from, target)) {
        Ok(()) => return Ok(()),
        Err(err) => last = err,
    }
    let id = identity::get();
    Err(HoloError::RenameFailure {
        context: context.to_string(),
        controller: id.controller.clone(),
        space: id.space.clone(),
        origin,
        source: last,
    })
}
