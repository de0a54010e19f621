//! Tree model for holotree
//!
//! A [`Root`] anchors an in-memory directory tree ([`Dir`] interior nodes,
//! [`File`] leaves) at an absolute path on disk. Files are identified by the
//! SHA-256 digest of their uncompressed body; the tree itself carries no
//! content. Trees are built by scanning a directory (ingest side) or loaded
//! from a catalog (restore side).
//!
//! All materialized metadata is pinned to a single sentinel timestamp,
//! [`mother_time`], so that content-identical trees produce byte-identical
//! directory listings across machines and runs.
//!
//! ## Walkers
//!
//! Traversal is separated from action: [`Dir::walk_post`] drives a
//! depth-first post-order visit and calls a caller-supplied tool on every
//! directory. The scheduling operations in [`ingest`](crate::ingest),
//! [`index`](crate::index) and [`restore`](crate::restore) are all thin
//! compositions over this walker; none of them perform I/O during the walk
//! itself.

use crate::error::Result;
use filetime::FileTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Sentinel timestamp for all materialized files and directories
/// (2020-01-01T00:00:00Z).
pub const MOTHER_TIME_SECS: i64 = 1_577_836_800;

/// Mother time as a [`FileTime`] for setting on-disk timestamps.
pub fn mother_time() -> FileTime {
    FileTime::from_unix_time(MOTHER_TIME_SECS, 0)
}

/// Mother time as a [`SystemTime`] for comparing stat results.
pub fn mother_system_time() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(MOTHER_TIME_SECS as u64)
}

/// A leaf node: one file identified by the digest of its uncompressed body
///
/// `digest` is computed before gzip compression and before any rewrite
/// patching; the `rewrite` offsets index into that same pre-patch byte
/// stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    /// Basename within the containing directory
    pub name: String,
    /// Lowercase hex SHA-256 of the uncompressed body
    pub digest: String,
    /// Size of the body in bytes (stat fingerprint)
    pub size: u64,
    /// POSIX permission bits to restore
    pub mode: u32,
    /// Byte offsets where the absolute-path prefix is patched on restore
    pub rewrite: Vec<u64>,
}

impl File {
    /// Quick freshness check against an on-disk stat result.
    ///
    /// A file counts as unchanged when size and permission bits match the
    /// recorded fingerprint and the mtime is pinned at mother time. This is
    /// deliberately conservative; the acceptance test is that a second
    /// restore of an untouched tree schedules zero file operations.
    pub fn matches(&self, meta: &fs::Metadata) -> bool {
        if !meta.is_file() || meta.len() != self.size {
            return false;
        }
        if mode_bits(meta) != self.mode & 0o7777 {
            return false;
        }
        match meta.modified() {
            Ok(modified) => match modified.duration_since(UNIX_EPOCH) {
                Ok(since) => since.as_secs() == MOTHER_TIME_SECS as u64,
                Err(_) => false,
            },
            Err(_) => false,
        }
    }
}

/// Permission bits of a stat result, masked to the POSIX mode range.
#[cfg(unix)]
pub fn mode_bits(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

/// Permission bits of a stat result (non-unix: read-only mapping only).
#[cfg(not(unix))]
pub fn mode_bits(meta: &fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// An interior node: named subdirectories and files
///
/// Both maps are ordered so that serialized catalogs are deterministic.
/// Iteration order is not otherwise a contract; the walkers define the only
/// ordering callers may rely on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dir {
    /// Basename within the containing directory (empty for a root)
    pub name: String,
    /// Subdirectories by name
    pub dirs: BTreeMap<String, Dir>,
    /// Files by name
    pub files: BTreeMap<String, File>,
}

impl Dir {
    /// Depth-first post-order walk: subdirectories first, then the tool is
    /// applied to this directory.
    pub fn walk_post<F>(&self, path: &Path, tool: &mut F) -> Result<()>
    where
        F: FnMut(&Path, &Dir) -> Result<()>,
    {
        for (name, subdir) in &self.dirs {
            subdir.walk_post(&path.join(name), tool)?;
        }
        tool(path, self)
    }

    /// Collect mutable references to every file together with its absolute
    /// path. Feeds the parallel digesting passes during ingest.
    pub fn collect_files_mut<'a>(
        &'a mut self,
        path: &Path,
        out: &mut Vec<(PathBuf, &'a mut File)>,
    ) {
        for (name, subdir) in self.dirs.iter_mut() {
            subdir.collect_files_mut(&path.join(name), out);
        }
        for (name, file) in self.files.iter_mut() {
            out.push((path.join(name), file));
        }
    }

    /// True if any file in this subtree carries rewrite offsets.
    pub fn has_rewrites(&self) -> bool {
        self.files.values().any(|file| !file.rewrite.is_empty())
            || self.dirs.values().any(Dir::has_rewrites)
    }

    /// Total number of files in this subtree.
    pub fn file_count(&self) -> usize {
        self.files.len() + self.dirs.values().map(Dir::file_count).sum::<usize>()
    }
}

/// A directory tree anchored at an absolute path on disk
///
/// `seek` is the absolute-path prefix the locator scanned for at ingest
/// time; the recorded rewrite offsets point at its occurrences. On restore
/// the anchor path supplies the patch bytes written back at those offsets,
/// so two roots with the same tree but different anchors materialize
/// different bytes at rewrite offsets while sharing every library object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Root {
    /// Absolute anchor path on disk
    pub path: PathBuf,
    /// Prefix scanned for at ingest time (empty when no rewriting was asked)
    pub seek: String,
    /// The tree itself
    pub tree: Dir,
}

impl Root {
    /// Create an empty root anchored at `path` (made absolute).
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = std::path::absolute(path.as_ref())?;
        Ok(Root {
            path,
            seek: String::new(),
            tree: Dir::default(),
        })
    }

    /// Patch bytes written at each rewrite offset when this root is
    /// materialized: the UTF-8 bytes of the anchor path.
    pub fn rewrite(&self) -> Vec<u8> {
        self.path.to_string_lossy().into_owned().into_bytes()
    }

    /// Replace the tree with a fresh scan of the anchor directory.
    ///
    /// Digests are left empty; the ingest passes fill them in. Symlinks and
    /// other non-regular entries are skipped with a warning.
    pub fn scan(&mut self) -> Result<()> {
        self.tree = scan_dir(&self.path, String::new())?;
        Ok(())
    }
}

fn scan_dir(path: &Path, name: String) -> Result<Dir> {
    let mut dir = Dir {
        name,
        ..Dir::default()
    };
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let entry_name = entry.file_name().to_string_lossy().into_owned();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            let subdir = scan_dir(&entry.path(), entry_name.clone())?;
            dir.dirs.insert(entry_name, subdir);
        } else if file_type.is_file() {
            let meta = entry.metadata()?;
            dir.files.insert(
                entry_name.clone(),
                File {
                    name: entry_name,
                    digest: String::new(),
                    size: meta.len(),
                    mode: mode_bits(&meta),
                    rewrite: Vec::new(),
                },
            );
        } else {
            warn!("skipping non-regular entry {:?}", entry.path());
        }
    }
    Ok(dir)
}

/// Dirty-bit counters shared across work units
///
/// Every reconciliation decision calls [`TreeStats::dirty`]; the dirty count
/// is the number of scheduled mutations, the total is the number of
/// decisions taken. A second restore of an untouched tree must end with a
/// dirty count of zero.
#[derive(Debug, Default)]
pub struct TreeStats {
    total: AtomicUsize,
    dirty: AtomicUsize,
}

impl TreeStats {
    /// Record one decision; `is_dirty` marks it as a scheduled mutation.
    pub fn dirty(&self, is_dirty: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if is_dirty {
            self.dirty.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of decisions that scheduled a mutation.
    pub fn dirty_count(&self) -> usize {
        self.dirty.load(Ordering::Relaxed)
    }

    /// Total number of decisions taken.
    pub fn total_count(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    /// True when no mutation was scheduled.
    pub fn is_clean(&self) -> bool {
        self.dirty_count() == 0
    }
}
