//! Restore pipeline: reconciling a destination directory against a target
//! tree
//!
//! Restore never rewrites a tree wholesale. [`make_branches`] lays down the
//! directory skeleton, then one reconciliation unit per directory compares
//! the target [`Dir`](crate::tree::Dir) against what is actually on disk
//! and schedules the minimal set of removals and [`drop_file`] units. A
//! file survives untouched only when it is *golden* (the last-materialized
//! digest recorded for its path is absent or equals the expected digest)
//! and its stat fingerprint still matches.
//!
//! Drops stage through partial files and rename into place, so a crash at
//! any point leaves either the old file, the new file or nothing, never a
//! half-written body.

use crate::error::{HoloError, Result};
use crate::library::{partial_for, Library};
use crate::retry::{try_remove, try_remove_all, try_rename};
use crate::tree::{mother_time, Dir, File, Root, TreeStats};
use crate::worker::WorkerPool;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Work unit: remove one file with retry.
pub fn remove_file(path: PathBuf) -> impl FnOnce() -> Result<()> + Send + 'static {
    move || try_remove("file", &path)
}

/// Work unit: remove one directory tree with retry.
pub fn remove_directory(path: PathBuf) -> impl FnOnce() -> Result<()> + Send + 'static {
    move || try_remove_all("directory", &path)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
        .map_err(|source| HoloError::path_io("chmod", path, source))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    let mut perms = fs::metadata(path)
        .map_err(|source| HoloError::path_io("stat", path, source))?
        .permissions();
    perms.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, perms).map_err(|source| HoloError::path_io("chmod", path, source))
}

/// Work unit: materialize one library body at `sink`.
///
/// The decompressed stream is copied into a partial sibling, the recorded
/// rewrite offsets are overwritten with the patch bytes, and the partial is
/// renamed into place. Mode is restored from the tree and both timestamps
/// are pinned to mother time. An offset past the decompressed body length
/// is fatal.
pub fn drop_file(
    library: Arc<dyn Library>,
    details: File,
    sink: PathBuf,
    patch: Arc<Vec<u8>>,
) -> impl FnOnce() -> Result<()> + Send + 'static {
    move || {
        let mut reader = library.open(&details.digest)?;
        let partial = partial_for(&sink);
        let outcome = (|| -> Result<()> {
            let mut out = fs::File::create(&partial)
                .map_err(|source| HoloError::path_io("create", &partial, source))?;
            let body = std::io::copy(&mut reader, &mut out)
                .map_err(|source| HoloError::path_io("copy", &sink, source))?;
            for &offset in &details.rewrite {
                if offset + patch.len() as u64 > body {
                    return Err(HoloError::RewriteOutOfRange {
                        path: sink.clone(),
                        offset,
                        body,
                    });
                }
                out.seek(SeekFrom::Start(offset))
                    .map_err(|source| HoloError::path_io("seek", &partial, source))?;
                out.write_all(&patch)
                    .map_err(|source| HoloError::path_io("write", &partial, source))?;
            }
            drop(out);
            try_rename("dropfile", &partial, &sink)?;
            set_mode(&sink, details.mode)?;
            filetime::set_file_times(&sink, mother_time(), mother_time())
                .map_err(|source| HoloError::path_io("chtimes", &sink, source))?;
            Ok(())
        })();
        if outcome.is_err() {
            let _ = fs::remove_file(&partial);
        }
        outcome
    }
}

/// Create the directory skeleton for a tree, post-order.
///
/// Creating only the leaves materializes every intermediate path; mother
/// time is set on the way back up so parent timestamps survive child
/// creation.
pub fn make_branches(path: &Path, it: &Dir) -> Result<()> {
    for (name, subdir) in &it.dirs {
        make_branches(&path.join(name), subdir)?;
    }
    if it.dirs.is_empty() {
        make_dirs(path)?;
    }
    filetime::set_file_times(path, mother_time(), mother_time())
        .map_err(|source| HoloError::path_io("chtimes", path, source))?;
    Ok(())
}

#[cfg(unix)]
fn make_dirs(path: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o750)
        .create(path)
        .map_err(|source| HoloError::path_io("mkdir", path, source))
}

#[cfg(not(unix))]
fn make_dirs(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|source| HoloError::path_io("mkdir", path, source))
}

/// Build the per-directory reconciliation tool.
///
/// The returned closure schedules one work unit per directory; the unit
/// lists actual entries, removes extras, drops changed and missing files
/// and records every decision in `stats`. `current` maps absolute paths to
/// their last-materialized digest and may be empty on a first run.
pub fn restore_directory<'a>(
    library: &'a Arc<dyn Library>,
    current: &'a Arc<HashMap<PathBuf, String>>,
    patch: &'a Arc<Vec<u8>>,
    stats: &'a Arc<TreeStats>,
    pool: &'a WorkerPool,
) -> impl FnMut(&Path, &Dir) -> Result<()> + 'a {
    move |path: &Path, it: &Dir| -> Result<()> {
        let path = path.to_path_buf();
        let expected_dirs: HashSet<String> = it.dirs.keys().cloned().collect();
        let expected_files = it.files.clone();
        let library = Arc::clone(library);
        let current = Arc::clone(current);
        let patch = Arc::clone(patch);
        let stats = Arc::clone(stats);
        let pool_handle = pool.clone();
        pool.submit(move || {
            // Snapshot the listing before any unit scheduled below starts
            // staging partial files into this directory.
            let entries = fs::read_dir(&path)
                .map_err(|source| HoloError::path_io("list", &path, source))?
                .collect::<std::io::Result<Vec<_>>>()?;
            let mut seen: HashSet<String> = HashSet::new();
            for entry in entries {
                let name = entry.file_name().to_string_lossy().into_owned();
                let directpath = path.join(&name);
                if entry.file_type()?.is_dir() {
                    let keep = expected_dirs.contains(&name);
                    if !keep {
                        trace!("holotree: remove extra directory {:?}", directpath);
                        pool_handle.submit(remove_directory(directpath));
                    }
                    stats.dirty(!keep);
                    continue;
                }
                seen.insert(name.clone());
                let Some(found) = expected_files.get(&name) else {
                    trace!("holotree: remove extra file {:?}", directpath);
                    pool_handle.submit(remove_file(directpath));
                    stats.dirty(true);
                    continue;
                };
                let golden = match current.get(&directpath) {
                    None => true,
                    Some(shadow) => &found.digest == shadow,
                };
                let meta = entry.metadata()?;
                let ok = golden && found.matches(&meta);
                stats.dirty(!ok);
                if !ok {
                    trace!("holotree: update changed file {:?}", directpath);
                    pool_handle.submit(drop_file(
                        Arc::clone(&library),
                        found.clone(),
                        directpath,
                        Arc::clone(&patch),
                    ));
                }
            }
            for (name, found) in &expected_files {
                if !seen.contains(name) {
                    let directpath = path.join(name);
                    stats.dirty(true);
                    trace!("holotree: add missing file {:?}", directpath);
                    pool_handle.submit(drop_file(
                        Arc::clone(&library),
                        found.clone(),
                        directpath,
                        Arc::clone(&patch),
                    ));
                }
            }
            Ok(())
        });
        Ok(())
    }
}

/// Materialize a root against the library.
///
/// Lays down the skeleton, schedules one reconciliation unit per directory
/// and waits for the whole fan-out. When the tree carries rewrite offsets
/// the patch bytes must be exactly as long as the seek prefix recorded at
/// ingest.
pub fn restore_root(
    library: Arc<dyn Library>,
    root: &Root,
    current: &HashMap<PathBuf, String>,
    pool: &WorkerPool,
) -> Result<Arc<TreeStats>> {
    let patch = root.rewrite();
    if root.tree.has_rewrites() && patch.len() != root.seek.len() {
        return Err(HoloError::RewriteLengthMismatch {
            seek: root.seek.len(),
            patch: patch.len(),
        });
    }
    make_branches(&root.path, &root.tree)?;

    let stats = Arc::new(TreeStats::default());
    let current = Arc::new(current.clone());
    let patch = Arc::new(patch);
    {
        let mut task = restore_directory(&library, &current, &patch, &stats, pool);
        root.tree.walk_post(&root.path, &mut task)?;
    }
    pool.sync()?;
    // Drops and removals bump the mtime of their containing directory;
    // pin the whole skeleton back to mother time once the dust settles.
    if !stats.is_clean() {
        make_branches(&root.path, &root.tree)?;
    }
    debug!(
        "restore of {:?} took {} decisions, {} dirty",
        root.path,
        stats.total_count(),
        stats.dirty_count()
    );
    if !stats.is_clean() {
        info!(
            "holotree {:?} updated ({} changes)",
            root.path,
            stats.dirty_count()
        );
    }
    Ok(stats)
}
