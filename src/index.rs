//! Hash index: which catalogs reference which digests
//!
//! Cold-start cost is dominated by reading every catalog and walking every
//! tree, so [`load_hololib_hashes`] does both in parallel with two barriers:
//! catalogs loaded, then digests mapped. Results land in per-slot cells
//! indexed by catalog position and the final inversion into
//! `digest → {catalog}` runs single-threaded after the second barrier.
//!
//! The walk-composed helpers here ([`digest_map`], [`digest_record`],
//! [`integrity_check`], [`catalog_check`]) are the read-only tree
//! operations the pipelines are built from.

use crate::error::{HoloError, Result};
use crate::library::{Hololib, Library};
use crate::tree::Root;
use crate::worker::WorkerPool;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

/// In-memory inversion `digest → set of catalog names that reference it`
#[derive(Debug, Default)]
pub struct HashIndex {
    by_digest: HashMap<String, HashSet<String>>,
}

impl HashIndex {
    /// True if any catalog references `digest`.
    pub fn contains(&self, digest: &str) -> bool {
        self.by_digest.contains_key(digest)
    }

    /// Catalogs referencing `digest`, if any.
    pub fn catalogs_of(&self, digest: &str) -> Option<&HashSet<String>> {
        self.by_digest.get(digest)
    }

    /// Number of distinct digests.
    pub fn len(&self) -> usize {
        self.by_digest.len()
    }

    /// True when no catalog references anything.
    pub fn is_empty(&self) -> bool {
        self.by_digest.is_empty()
    }

    /// The digest set as a name filter. Library-side maintenance names
    /// objects by their digest, so this doubles as the known-name set the
    /// ingest hasher consults.
    pub fn known_names(&self) -> HashSet<String> {
        self.by_digest.keys().cloned().collect()
    }

    fn insert(&mut self, digest: &str, catalog: &str) {
        self.by_digest
            .entry(digest.to_string())
            .or_default()
            .insert(catalog.to_string());
    }
}

/// Map every digest in a root to its path relative to the anchor.
pub fn digest_map(root: &Root) -> Result<HashMap<String, PathBuf>> {
    let mut target = HashMap::new();
    root.tree.walk_post(Path::new(""), &mut |path, it| {
        for (name, file) in &it.files {
            target.insert(file.digest.clone(), path.join(name));
        }
        Ok(())
    })?;
    Ok(target)
}

/// Record every absolute path in a root with its digest. The result is the
/// `current` map a later restore reconciles against.
pub fn digest_record(root: &Root) -> Result<HashMap<PathBuf, String>> {
    let mut target = HashMap::new();
    root.tree.walk_post(&root.path, &mut |path, it| {
        for (name, file) in &it.files {
            target.insert(path.join(name), file.digest.clone());
        }
        Ok(())
    })?;
    Ok(target)
}

/// List library files whose name does not match their digest. Anything
/// returned is corrupt or foreign.
pub fn integrity_check(root: &Root) -> Result<HashMap<PathBuf, String>> {
    let mut result = HashMap::new();
    root.tree.walk_post(&root.path, &mut |path, it| {
        for (name, file) in &it.files {
            if file.name != file.digest {
                result.insert(path.join(name), file.digest.clone());
            }
        }
        Ok(())
    })?;
    Ok(result)
}

/// Schedule one existence check per file in the root; a missing body
/// surfaces as [`HoloError::MissingContent`] at the caller's `sync()`.
pub fn catalog_check(library: &Arc<Hololib>, root: &Root, pool: &WorkerPool) -> Result<()> {
    root.tree.walk_post(&root.path, &mut |path, it| {
        for (name, file) in &it.files {
            let library = Arc::clone(library);
            let digest = file.digest.clone();
            let fullpath = path.join(name);
            pool.submit(move || {
                if library.exact_location(&digest).is_file() {
                    Ok(())
                } else {
                    Err(HoloError::MissingContent {
                        path: fullpath,
                        digest,
                    })
                }
            });
        }
        Ok(())
    })
}

/// Load every catalog and invert into a [`HashIndex`].
pub fn load_hololib_hashes(library: &Hololib, pool: &WorkerPool) -> Result<HashIndex> {
    let catalogs = library.catalogs()?;
    let count = catalogs.len();

    // Barrier one: all catalogs parsed into their slots.
    let roots: Arc<Vec<Mutex<Option<Root>>>> =
        Arc::new((0..count).map(|_| Mutex::new(None)).collect());
    for (at, name) in catalogs.iter().enumerate() {
        let path = library.catalog_path(name);
        let roots = Arc::clone(&roots);
        pool.submit(move || {
            let root = Root::load_from(&path)?;
            trace!("catalog {:?} loaded", path);
            *roots[at].lock() = Some(root);
            Ok(())
        });
    }
    pool.sync()?;

    // Barrier two: every root mapped to its digest set.
    let slots: Arc<Vec<Mutex<Option<HashMap<String, PathBuf>>>>> =
        Arc::new((0..count).map(|_| Mutex::new(None)).collect());
    for at in 0..count {
        let roots = Arc::clone(&roots);
        let slots = Arc::clone(&slots);
        pool.submit(move || {
            let guard = roots[at].lock();
            let root = guard
                .as_ref()
                .ok_or_else(|| HoloError::internal("catalog slot left empty"))?;
            let mapped = digest_map(root)?;
            trace!("root {:?} mapped ({} digests)", root.path, mapped.len());
            drop(guard);
            *slots[at].lock() = Some(mapped);
            Ok(())
        });
    }
    pool.sync()?;

    let mut index = HashIndex::default();
    for (at, catalog) in catalogs.iter().enumerate() {
        if let Some(mapped) = slots[at].lock().take() {
            for digest in mapped.keys() {
                index.insert(digest, catalog);
            }
        }
    }
    debug!(
        "hololib hashes loaded: {} digests across {} catalogs",
        index.len(),
        count
    );
    Ok(index)
}
