//! Archive export traversal
//!
//! The archive sink itself lives outside this crate; all that is consumed
//! here is its `add` contract. [`zip_root`] feeds it the library object
//! behind every file a root references, with paths relative to the library
//! base so the archive can be unpacked over another hololib.

use crate::error::Result;
use crate::library::{Hololib, Library};
use crate::tree::Root;
use std::path::Path;
use tracing::trace;

/// Archive sink contract
pub trait Zipper {
    /// Add the file at `fullpath` to the archive under `relativepath`.
    fn add(&mut self, fullpath: &Path, relativepath: &Path) -> Result<()>;
}

/// Feed the object behind every file in `root` to the sink, one `add` call
/// per file entry. Files sharing a body repeat the same object path; the
/// sink owns any collapsing of duplicates.
pub fn zip_root(library: &Hololib, root: &Root, sink: &mut dyn Zipper) -> Result<()> {
    root.tree.walk_post(&root.path, &mut |_path, it| {
        for file in it.files.values() {
            let location = library.exact_location(&file.digest);
            let relative = library.relative_location(&file.digest)?;
            trace!("zipping {:?} as {:?}", location, relative);
            sink.add(&location, &relative)?;
        }
        Ok(())
    })
}
