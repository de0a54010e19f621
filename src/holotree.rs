//! Holotree façade: the ingest and restore pipelines wired end to end
//!
//! [`Holotree`] owns an open [`Hololib`] and a [`WorkerPool`] and exposes
//! the operations an embedding application drives:
//!
//! - [`record`](Holotree::record) scans a source tree, digests it (with
//!   rewrite discovery when a seek prefix is given, through the plain
//!   hasher otherwise), lifts every new body into the library and persists
//!   the catalog.
//! - [`restore`](Holotree::restore) loads a catalog, re-anchors it at a
//!   destination and reconciles the destination directory against it.
//! - [`catalog_check`](Holotree::catalog_check) verifies that every body a
//!   catalog references is present.
//! - [`zip`](Holotree::zip) exports a catalog's objects to an archive sink.
//!
//! The pool is an explicit collaborator so tests can construct isolated
//! instances and observe scheduling behavior.
//!
//! ## Example
//!
//! ```rust,no_run
//! use holotree::{Holotree, Hololib};
//! use std::collections::HashMap;
//! use std::path::Path;
//!
//! # fn main() -> holotree::Result<()> {
//! let library = Hololib::init_or_open("/var/lib/hololib")?;
//! let holotree = Holotree::new(library, 0)?;
//!
//! // Record a source tree as catalog "v1".
//! let recorded = holotree.record(Path::new("/work/space1"), Some("/work/space1"), "v1")?;
//! println!("{} new bodies lifted", recorded.stats.dirty_count());
//!
//! // Materialize it somewhere else (same path length when rewriting).
//! let restored = holotree.restore("v1", Path::new("/work/space2"), &HashMap::new())?;
//! println!("{} changes applied", restored.dirty_count());
//! # Ok(())
//! # }
//! ```

use crate::error::{HoloError, Result};
use crate::index::{self, HashIndex};
use crate::library::{Hololib, Library};
use crate::restore::restore_root;
use crate::tree::{Root, TreeStats};
use crate::worker::WorkerPool;
use crate::zip::{zip_root, Zipper};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Outcome of a record operation
#[derive(Debug)]
pub struct Recorded {
    /// The digested root, as persisted in the catalog
    pub root: Root,
    /// One decision per unique digest; dirty means a lift was scheduled
    pub stats: TreeStats,
}

/// Content-addressed materializer over one library
#[derive(Debug)]
pub struct Holotree {
    library: Arc<Hololib>,
    pool: WorkerPool,
}

impl Holotree {
    /// Wire a holotree over an open library with `workers` pool threads
    /// (0 means one per logical CPU).
    pub fn new(library: Hololib, workers: usize) -> Result<Self> {
        Ok(Holotree {
            library: Arc::new(library),
            pool: WorkerPool::new(workers)?,
        })
    }

    /// The underlying library.
    pub fn library(&self) -> &Hololib {
        &self.library
    }

    /// The worker pool driving this holotree.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Ingest the tree at `source` and persist it as `catalog`.
    ///
    /// With a `seek` prefix the locator records every occurrence for
    /// rewriting while digesting; that is the path for recording working
    /// trees. Without one the plain hasher digests the tree instead (gzip
    /// artifacts hash as their decompressed bodies) and cleans up source
    /// files whose name is unknown to the library index, which is the
    /// ingest path for trees of library-named objects whose bodies the
    /// library already holds. Digesting always covers the unmodified
    /// bytes, so the same content recorded from different anchors
    /// deduplicates to the same objects.
    pub fn record(&self, source: &Path, seek: Option<&str>, catalog: &str) -> Result<Recorded> {
        let mut root = Root::new(source)?;
        root.scan()?;
        match seek {
            Some(seek) => crate::ingest::locate_tree(&mut root, seek)?,
            None => {
                let known = self.load_hashes()?.known_names();
                crate::ingest::hash_tree(&mut root, &known, &self.pool)?;
                // Source cleanup settles before any lift opens a source.
                self.pool.sync()?;
            }
        }

        let stats = TreeStats::default();
        crate::ingest::schedule_lifters(self.library.as_ref(), &root, &stats, &self.pool)?;
        self.pool.sync()?;

        root.save_as(&self.library.catalog_path(catalog))?;
        info!(
            "recorded {:?} as catalog {:?} ({} files, {} new bodies)",
            root.path,
            catalog,
            root.tree.file_count(),
            stats.dirty_count()
        );
        Ok(Recorded { root, stats })
    }

    /// Materialize `catalog` at `dest`.
    ///
    /// `current` maps absolute destination paths to their last-materialized
    /// digests (empty on a first run); it gates the golden check that lets
    /// locally modified files with matching fingerprints survive. When the
    /// catalog carries rewrite offsets the destination path must be exactly
    /// as long as the recorded seek prefix.
    pub fn restore(
        &self,
        catalog: &str,
        dest: &Path,
        current: &HashMap<PathBuf, String>,
    ) -> Result<Arc<TreeStats>> {
        let mut root = self.load_catalog(catalog)?;
        root.path = std::path::absolute(dest)?;
        restore_root(
            Arc::clone(&self.library) as Arc<dyn Library>,
            &root,
            current,
            &self.pool,
        )
    }

    /// Verify that every body `catalog` references is present in the
    /// library. Fails with the first missing digest.
    pub fn catalog_check(&self, catalog: &str) -> Result<()> {
        let root = self.load_catalog(catalog)?;
        index::catalog_check(&self.library, &root, &self.pool)?;
        self.pool.sync()
    }

    /// Export every object `catalog` references to an archive sink.
    pub fn zip(&self, catalog: &str, sink: &mut dyn Zipper) -> Result<()> {
        let root = self.load_catalog(catalog)?;
        zip_root(&self.library, &root, sink)
    }

    /// Load the full hash index of the library.
    pub fn load_hashes(&self) -> Result<HashIndex> {
        index::load_hololib_hashes(&self.library, &self.pool)
    }

    fn load_catalog(&self, catalog: &str) -> Result<Root> {
        let path = self.library.catalog_path(catalog);
        if !path.is_file() {
            return Err(HoloError::CatalogNotFound(catalog.to_string()));
        }
        Root::load_from(&path)
    }
}
