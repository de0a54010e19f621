//! Content-addressed object library ("hololib")
//!
//! The library stores each unique file body exactly once, gzip-compressed,
//! under its SHA-256 digest. The on-disk layout is a two-level hex fan-out
//! so no single directory collects millions of entries:
//!
//! ```text
//! hololib/
//! ├── metadata.json        # format version and creator
//! ├── catalog/             # one file per recorded root
//! │   └── <name>
//! └── library/             # content shards
//!     └── <d0d1>/
//!         └── <d2d3>/
//!             └── <digest> # raw gzip stream; decompresses to the body
//! ```
//!
//! Entries are created once and never rewritten. Writers stage into
//! `<target>.part<id>` siblings and rename into place, so readers observe
//! either absence or a complete object; concurrent writers of the same
//! digest race benignly because the last rename wins. Removal is a cleanup
//! concern outside this core.

use crate::compress;
use crate::error::{HoloError, Result};
use crate::worker::next_part_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const LIBRARY_DIR: &str = "library";
const CATALOG_DIR: &str = "catalog";
const METADATA_FILE: &str = "metadata.json";
const FORMAT_VERSION: u32 = 1;

/// Read-side view of a content-addressed library
pub trait Library: Send + Sync {
    /// Directory that contains (or would contain) the object for `digest`.
    fn location(&self, digest: &str) -> PathBuf;

    /// Full path of the object for `digest`.
    fn exact_location(&self, digest: &str) -> PathBuf;

    /// Open the object for `digest` as a decompressing reader.
    fn open(&self, digest: &str) -> Result<Box<dyn Read + Send>>;
}

/// Write-side extension: resolve destinations for new digests
pub trait MutableLibrary: Library {
    /// Create the shard directory for `digest` if needed and return the
    /// object path. A concurrently created shard is not an error.
    fn ensure_location(&self, digest: &str) -> Result<PathBuf>;
}

/// Persisted library metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryMetadata {
    /// Version of the on-disk format
    pub format_version: u32,
    /// Crate version that created the library
    pub holotree_version: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Concrete on-disk hololib
#[derive(Debug, Clone)]
pub struct Hololib {
    base: PathBuf,
}

impl Hololib {
    /// Create a new library skeleton at `base`. The directory may exist but
    /// must not already hold a library.
    pub fn init(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        if base.join(METADATA_FILE).exists() {
            return Err(HoloError::Internal(format!(
                "library already exists at {base:?}"
            )));
        }
        fs::create_dir_all(base.join(LIBRARY_DIR))?;
        fs::create_dir_all(base.join(CATALOG_DIR))?;
        let metadata = LibraryMetadata {
            format_version: FORMAT_VERSION,
            holotree_version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: Utc::now(),
        };
        fs::write(
            base.join(METADATA_FILE),
            serde_json::to_string_pretty(&metadata)?,
        )?;
        info!("initialized hololib at {:?}", base);
        Ok(Hololib { base })
    }

    /// Open an existing library at `base`.
    pub fn open(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        let metadata_path = base.join(METADATA_FILE);
        if !metadata_path.exists() {
            return Err(HoloError::LibraryNotInitialized(base));
        }
        let metadata: LibraryMetadata = serde_json::from_str(&fs::read_to_string(metadata_path)?)?;
        if metadata.format_version != FORMAT_VERSION {
            return Err(HoloError::corrupted(format!(
                "unsupported hololib format version {}",
                metadata.format_version
            )));
        }
        debug!("opened hololib at {:?}", base);
        Ok(Hololib { base })
    }

    /// Open the library at `base`, initializing it first when absent.
    pub fn init_or_open(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        if base.join(METADATA_FILE).exists() {
            Hololib::open(base)
        } else {
            Hololib::init(base)
        }
    }

    /// Base directory of the library.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Path of the catalog file for `name`.
    pub fn catalog_path(&self, name: &str) -> PathBuf {
        self.base.join(CATALOG_DIR).join(name)
    }

    /// Names of all catalogs currently in the library.
    pub fn catalogs(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let dir = self.base.join(CATALOG_DIR);
        if dir.exists() {
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    // Skip staging leftovers from interrupted writers.
                    if !name.contains(".part") {
                        names.push(name);
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Relative path of an object within the library base, as used by
    /// archive sinks.
    pub fn relative_location(&self, digest: &str) -> Result<PathBuf> {
        let exact = self.exact_location(digest);
        exact
            .strip_prefix(&self.base)
            .map(Path::to_path_buf)
            .map_err(|_| {
                HoloError::internal(format!("object path {exact:?} escapes {:?}", self.base))
            })
    }
}

impl Library for Hololib {
    fn location(&self, digest: &str) -> PathBuf {
        // Digests shorter than the fan-out width land flat in the shard
        // root; full SHA-256 digests always take the two-level path.
        let mut location = self.base.join(LIBRARY_DIR);
        if digest.len() >= 4 {
            location = location.join(&digest[..2]).join(&digest[2..4]);
        }
        location
    }

    fn exact_location(&self, digest: &str) -> PathBuf {
        self.location(digest).join(digest)
    }

    fn open(&self, digest: &str) -> Result<Box<dyn Read + Send>> {
        let path = self.exact_location(digest);
        let file =
            fs::File::open(&path).map_err(|source| HoloError::path_io("open", &path, source))?;
        Ok(Box::new(compress::decoder(BufReader::new(file))))
    }
}

impl MutableLibrary for Hololib {
    fn ensure_location(&self, digest: &str) -> Result<PathBuf> {
        let location = self.location(digest);
        // create_dir_all treats an existing directory as success, which is
        // exactly the tolerance concurrent shard creation needs.
        fs::create_dir_all(&location)
            .map_err(|source| HoloError::path_io("mkdir", &location, source))?;
        Ok(self.exact_location(digest))
    }
}

/// Staging sibling for an atomic write: `<target>.part<id>`.
pub fn partial_for(target: &Path) -> PathBuf {
    PathBuf::from(format!("{}.part{}", target.display(), next_part_id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_init_and_open() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("hololib");
        Hololib::init(&base).unwrap();
        assert!(base.join("metadata.json").exists());
        assert!(base.join("library").is_dir());
        assert!(base.join("catalog").is_dir());

        let lib = Hololib::open(&base).unwrap();
        assert_eq!(lib.base(), base);

        // init refuses an existing library; init_or_open opens it.
        assert!(Hololib::init(&base).is_err());
        Hololib::init_or_open(&base).unwrap();
    }

    #[test]
    fn test_open_requires_metadata() {
        let temp = TempDir::new().unwrap();
        let err = Hololib::open(temp.path().join("nowhere")).unwrap_err();
        assert!(matches!(err, HoloError::LibraryNotInitialized(_)));
    }

    #[test]
    fn test_sharded_locations() {
        let temp = TempDir::new().unwrap();
        let lib = Hololib::init(temp.path().join("hololib")).unwrap();
        let digest = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        let location = lib.location(digest);
        assert!(location.ends_with("library/2c/f2"));
        assert_eq!(lib.exact_location(digest), location.join(digest));
        assert_eq!(
            lib.relative_location(digest).unwrap(),
            PathBuf::from("library/2c/f2").join(digest)
        );
    }

    #[test]
    fn test_open_decompresses() {
        let temp = TempDir::new().unwrap();
        let lib = Hololib::init(temp.path().join("hololib")).unwrap();
        let digest = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        let sink = lib.ensure_location(digest).unwrap();

        let mut encoder = compress::encoder(Vec::new());
        encoder.write_all(b"hello").unwrap();
        fs::write(&sink, encoder.finish().unwrap()).unwrap();

        let mut body = Vec::new();
        lib.open(digest).unwrap().read_to_end(&mut body).unwrap();
        assert_eq!(body, b"hello");
    }

    #[test]
    fn test_catalogs_skip_partials() {
        let temp = TempDir::new().unwrap();
        let lib = Hololib::init(temp.path().join("hololib")).unwrap();
        fs::write(lib.catalog_path("alpha"), b"{}").unwrap();
        fs::write(lib.catalog_path("beta.part7"), b"{}").unwrap();
        assert_eq!(lib.catalogs().unwrap(), vec!["alpha".to_string()]);
    }

    #[test]
    fn test_partial_names_are_unique() {
        let target = Path::new("/tmp/x");
        assert_ne!(partial_for(target), partial_for(target));
    }
}
