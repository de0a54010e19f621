//! # Holotree - content-addressed virtual filesystem materializer
//!
//! Holotree manages logical directory trees whose files are identified by
//! SHA-256 content digests. Each unique file body is stored exactly once in
//! a shared gzip-compressed object library (the "hololib"); full working
//! copies of those trees are materialized on disk by decompressing and
//! rewriting objects into place.
//!
//! ## Overview
//!
//! - **Content-addressed ingestion**: hash an arbitrary on-disk tree,
//!   deduplicate against the library and atomically lift new bodies into it
//!   under their digests.
//! - **Reconciliation**: given a target tree and the current state of a
//!   destination directory, compute the minimal set of creations, updates
//!   and removals and apply them with crash-safe staging.
//! - **Path rewriting**: files may embed an absolute "seek" prefix captured
//!   at ingest time; materialization patches the recorded offsets with the
//!   destination's actual prefix, so relocated trees stay internally
//!   consistent while sharing every library object.
//! - **Parallel scheduling**: the pipelines fan work units out over a
//!   bounded [`WorkerPool`] with deduplication of redundant units and a
//!   single-error barrier.
//!
//! ## Quick start
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
//! holotree.record(Path::new("/work/space1"), Some("/work/space1"), "v1")?;
//! holotree.restore("v1", Path::new("/work/space2"), &HashMap::new())?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Key concepts
//!
//! - **Digest**: lowercase hex SHA-256 of a file's uncompressed body,
//!   computed before compression and before any rewrite patching.
//! - **Catalog**: one persisted [`Root`]: anchor path, seek prefix and
//!   tree. The library holds many catalogs sharing one object store.
//! - **Lift**: compress a source body into the library under its digest.
//! - **Drop**: materialize a library body at a destination path,
//!   decompressing and patching rewrite offsets.
//! - **Mother time**: a fixed sentinel timestamp carried by everything
//!   materialized, so content-identical trees are metadata-identical too.
//!
//! ## Module organization
//!
//! - [`tree`]: tree model, walkers and stat fingerprints
//! - [`library`]: the content-addressed object store
//! - [`ingest`]: digesting, rewrite discovery and lifting
//! - [`restore`]: reconciliation, dropping and skeleton creation
//! - [`index`]: catalog/digest hash index
//! - [`catalog`]: catalog persistence
//! - [`worker`]: bounded worker pool
//! - [`retry`]: retrying filesystem primitives
//! - [`zip`]: archive export traversal
//! - [`holotree`]: the end-to-end façade
//! - [`error`]: error types
//! - [`identity`]: process identity tags for error reports

pub mod catalog;
pub mod compress;
pub mod error;
pub mod holotree;
pub mod identity;
pub mod index;
pub mod ingest;
pub mod library;
pub mod restore;
pub mod retry;
pub mod tree;
pub mod worker;
pub mod zip;

pub use error::{HoloError, Result};
pub use holotree::{Holotree, Recorded};
pub use index::HashIndex;
pub use library::{Hololib, Library, LibraryMetadata, MutableLibrary};
pub use tree::{mother_system_time, mother_time, Dir, File, Root, TreeStats, MOTHER_TIME_SECS};
pub use worker::WorkerPool;
pub use zip::Zipper;
