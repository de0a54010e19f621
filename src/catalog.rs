//! Catalog persistence
//!
//! A catalog is one serialized [`Root`]: the anchor path, the seek prefix
//! recorded at ingest and the whole tree. The body is gzip-compressed JSON;
//! tree maps are ordered, so recording the same content twice produces the
//! same catalog bytes. Writes stage through a `.part<id>` sibling and rename
//! into place like every other library write.

use crate::compress;
use crate::error::{HoloError, Result};
use crate::library::partial_for;
use crate::retry::try_rename;
use crate::tree::Root;
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::debug;

impl Root {
    /// Load a root from a catalog file.
    pub fn load_from(catalog: &Path) -> Result<Root> {
        let file = fs::File::open(catalog)
            .map_err(|source| HoloError::path_io("open", catalog, source))?;
        let reader = compress::decoder(BufReader::new(file));
        let root: Root = serde_json::from_reader(reader).map_err(|err| {
            HoloError::corrupted(format!("catalog {catalog:?} does not parse: {err}"))
        })?;
        debug!("catalog {:?} loaded ({} files)", catalog, root.tree.file_count());
        Ok(root)
    }

    /// Persist this root as a catalog file, atomically.
    pub fn save_as(&self, catalog: &Path) -> Result<()> {
        let partial = partial_for(catalog);
        let outcome = (|| -> Result<()> {
            let file = fs::File::create(&partial)
                .map_err(|source| HoloError::path_io("create", &partial, source))?;
            let mut writer = compress::encoder(BufWriter::new(file));
            serde_json::to_writer(&mut writer, self)?;
            let inner = writer.finish()?;
            inner
                .into_inner()
                .map_err(|err| HoloError::path_io("flush", &partial, err.into_error()))?;
            try_rename("catalog", &partial, catalog)
        })();
        if outcome.is_err() {
            let _ = fs::remove_file(&partial);
        }
        outcome
    }
}
