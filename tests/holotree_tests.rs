//! End-to-end tests for holotree
//!
//! Each test drives the full pipeline: scan and digest a source tree, lift
//! bodies into a fresh hololib, persist the catalog, then materialize and
//! reconcile destination directories against it.

use holotree::{mother_system_time, Hololib, Holotree, Recorded, MOTHER_TIME_SECS};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tempfile::TempDir;

const HELLO_DIGEST: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

fn fresh_holotree(temp: &TempDir) -> Holotree {
    let library = Hololib::init(temp.path().join("hololib")).unwrap();
    Holotree::new(library, 4).unwrap()
}

/// Record a working tree, seeking its own anchor path for rewriting.
fn record_tree(holotree: &Holotree, source: &Path, catalog: &str) -> Recorded {
    let seek = source.to_string_lossy().into_owned();
    holotree.record(source, Some(&seek), catalog).unwrap()
}

/// Count objects in the library's content shards.
fn object_count(holotree: &Holotree) -> usize {
    fn walk(dir: &Path, count: &mut usize) {
        for entry in fs::read_dir(dir).unwrap() {
            let entry = entry.unwrap();
            if entry.file_type().unwrap().is_dir() {
                walk(&entry.path(), count);
            } else {
                *count += 1;
            }
        }
    }
    let mut count = 0;
    walk(&holotree.library().base().join("library"), &mut count);
    count
}

fn assert_mother_time(path: &Path) {
    let meta = fs::metadata(path).unwrap();
    let since = meta
        .modified()
        .unwrap()
        .duration_since(UNIX_EPOCH)
        .unwrap();
    assert_eq!(
        since.as_secs(),
        MOTHER_TIME_SECS as u64,
        "mtime of {path:?} is not mother time"
    );
}

#[test]
fn test_empty_ingest_and_restore() {
    let temp = TempDir::new().unwrap();
    let holotree = fresh_holotree(&temp);

    let source = temp.path().join("empty");
    fs::create_dir_all(&source).unwrap();
    let recorded = record_tree(&holotree, &source, "v0");
    assert_eq!(recorded.root.tree.file_count(), 0);
    assert_eq!(object_count(&holotree), 0);
    assert!(holotree.load_hashes().unwrap().is_empty());

    let dest = temp.path().join("out");
    let stats = holotree.restore("v0", &dest, &HashMap::new()).unwrap();
    assert!(stats.is_clean());
    assert!(dest.is_dir());
    assert_eq!(fs::read_dir(&dest).unwrap().count(), 0);
    assert_mother_time(&dest);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        assert_eq!(
            fs::metadata(&dest).unwrap().permissions().mode() & 0o777,
            0o750
        );
    }
}

#[test]
fn test_single_file_ingest_and_restore() {
    let temp = TempDir::new().unwrap();
    let holotree = fresh_holotree(&temp);

    let source = temp.path().join("src");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("a.txt"), b"hello").unwrap();

    let recorded = record_tree(&holotree, &source, "v1");
    let file = &recorded.root.tree.files["a.txt"];
    assert_eq!(file.digest, HELLO_DIGEST);
    assert!(file.rewrite.is_empty());

    // The library holds exactly one object whose decompressed bytes are
    // the body, stored under the digest.
    assert_eq!(object_count(&holotree), 1);
    assert!(holotree
        .library()
        .base()
        .join("library/2c/f2")
        .join(HELLO_DIGEST)
        .is_file());

    let dest = temp.path().join("out");
    let stats = holotree.restore("v1", &dest, &HashMap::new()).unwrap();
    assert_eq!(stats.dirty_count(), 1);

    let restored = dest.join("a.txt");
    assert_eq!(fs::read(&restored).unwrap(), b"hello");
    assert_mother_time(&restored);
    assert_eq!(
        fs::metadata(&restored).unwrap().modified().unwrap(),
        mother_system_time()
    );
}

#[test]
fn test_dedup_stores_one_object() {
    let temp = TempDir::new().unwrap();
    let holotree = fresh_holotree(&temp);

    let source = temp.path().join("src");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("a"), b"X").unwrap();
    fs::write(source.join("b"), b"X").unwrap();

    let recorded = record_tree(&holotree, &source, "v1");
    assert_eq!(recorded.stats.total_count(), 1);
    assert_eq!(object_count(&holotree), 1);

    let dest = temp.path().join("out");
    holotree.restore("v1", &dest, &HashMap::new()).unwrap();
    assert_eq!(fs::read(dest.join("a")).unwrap(), b"X");
    assert_eq!(fs::read(dest.join("b")).unwrap(), b"X");
}

#[test]
fn test_rewrite_round_trip() {
    let temp = TempDir::new().unwrap();
    let holotree = fresh_holotree(&temp);

    // Same-length anchors so the recorded seek and the patch agree.
    let source = temp.path().join("space1");
    let dest = temp.path().join("space2");
    fs::create_dir_all(&source).unwrap();

    let seek = source.to_string_lossy().into_owned();
    let body = format!("pre{seek}post");
    fs::write(source.join("f"), &body).unwrap();

    let recorded = record_tree(&holotree, &source, "v1");
    let file = &recorded.root.tree.files["f"];
    assert_eq!(file.rewrite, vec![3]);
    let recorded_digest = file.digest.clone();

    let stats = holotree.restore("v1", &dest, &HashMap::new()).unwrap();
    assert_eq!(stats.dirty_count(), 1);

    let expected = format!("pre{}post", dest.to_string_lossy());
    assert_eq!(fs::read_to_string(dest.join("f")).unwrap(), expected);

    // A second destination materializes different bytes at the rewrite
    // offsets from the very same object; the catalog digest never moves.
    let dest2 = temp.path().join("space3");
    holotree.restore("v1", &dest2, &HashMap::new()).unwrap();
    let expected2 = format!("pre{}post", dest2.to_string_lossy());
    assert_eq!(fs::read_to_string(dest2.join("f")).unwrap(), expected2);
    assert_eq!(object_count(&holotree), 1);
    assert_eq!(recorded_digest.len(), 64);
}

#[test]
fn test_reconcile_removes_extras() {
    let temp = TempDir::new().unwrap();
    let holotree = fresh_holotree(&temp);

    let source = temp.path().join("src");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("a"), b"A").unwrap();
    fs::write(source.join("b"), b"B").unwrap();
    record_tree(&holotree, &source, "v1");

    // Destination starts with extras the target does not declare.
    let dest = temp.path().join("out");
    fs::create_dir_all(dest.join("subdir")).unwrap();
    fs::write(dest.join("a"), b"stale").unwrap();
    fs::write(dest.join("b"), b"stale").unwrap();
    fs::write(dest.join("c"), b"extra").unwrap();
    fs::write(dest.join("subdir/deep"), b"extra").unwrap();

    let stats = holotree.restore("v1", &dest, &HashMap::new()).unwrap();
    assert!(stats.dirty_count() >= 2);

    assert!(!dest.join("c").exists());
    assert!(!dest.join("subdir").exists());
    assert_eq!(fs::read(dest.join("a")).unwrap(), b"A");
    assert_eq!(fs::read(dest.join("b")).unwrap(), b"B");
    assert_eq!(fs::read_dir(&dest).unwrap().count(), 2);
}

#[test]
fn test_restore_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let holotree = fresh_holotree(&temp);

    let source = temp.path().join("src");
    fs::create_dir_all(source.join("nested/deeper")).unwrap();
    fs::write(source.join("top"), b"top body").unwrap();
    fs::write(source.join("nested/mid"), b"mid body").unwrap();
    fs::write(source.join("nested/deeper/leaf"), b"leaf body").unwrap();
    record_tree(&holotree, &source, "v1");

    let dest = temp.path().join("out");
    let first = holotree.restore("v1", &dest, &HashMap::new()).unwrap();
    assert_eq!(first.dirty_count(), 3);

    // Second run over an untouched tree schedules nothing.
    let second = holotree.restore("v1", &dest, &HashMap::new()).unwrap();
    assert_eq!(second.dirty_count(), 0);
    assert!(second.total_count() > 0);
}

#[test]
fn test_mother_time_everywhere() {
    let temp = TempDir::new().unwrap();
    let holotree = fresh_holotree(&temp);

    let source = temp.path().join("src");
    fs::create_dir_all(source.join("sub")).unwrap();
    fs::write(source.join("sub/f"), b"body").unwrap();
    record_tree(&holotree, &source, "v1");

    let dest = temp.path().join("out");
    holotree.restore("v1", &dest, &HashMap::new()).unwrap();

    assert_mother_time(&dest);
    assert_mother_time(&dest.join("sub"));
    assert_mother_time(&dest.join("sub/f"));
}

#[test]
fn test_current_map_gates_golden_check() {
    let temp = TempDir::new().unwrap();
    let holotree = fresh_holotree(&temp);

    // Two catalogs whose file differs in content but not in size, so the
    // stat fingerprint alone cannot tell them apart.
    let one = temp.path().join("one");
    fs::create_dir_all(&one).unwrap();
    fs::write(one.join("f"), b"hello").unwrap();
    record_tree(&holotree, &one, "v1");

    let two = temp.path().join("two");
    fs::create_dir_all(&two).unwrap();
    fs::write(two.join("f"), b"world").unwrap();
    let v2 = record_tree(&holotree, &two, "v2");

    let dest = temp.path().join("out");
    let v1_restored = holotree.restore("v1", &dest, &HashMap::new()).unwrap();
    assert_eq!(v1_restored.dirty_count(), 1);

    // Without the current map the fingerprint matches and the stale body
    // survives.
    let blind = holotree.restore("v2", &dest, &HashMap::new()).unwrap();
    assert_eq!(blind.dirty_count(), 0);
    assert_eq!(fs::read(dest.join("f")).unwrap(), b"hello");

    // With the last-materialized digests recorded, the golden check fails
    // and the file is updated.
    let mut current: HashMap<PathBuf, String> = HashMap::new();
    current.insert(dest.join("f"), HELLO_DIGEST.to_string());
    let informed = holotree.restore("v2", &dest, &current).unwrap();
    assert_eq!(informed.dirty_count(), 1);
    assert_eq!(fs::read(dest.join("f")).unwrap(), b"world");
    assert_eq!(
        v2.root.tree.files["f"].digest.len(),
        64,
        "digest recorded for v2"
    );
}

#[test]
fn test_hash_index_follows_catalogs() {
    let temp = TempDir::new().unwrap();
    let holotree = fresh_holotree(&temp);

    let one = temp.path().join("one");
    fs::create_dir_all(&one).unwrap();
    fs::write(one.join("shared"), b"common body").unwrap();
    let recorded = record_tree(&holotree, &one, "v1");

    let two = temp.path().join("two");
    fs::create_dir_all(&two).unwrap();
    fs::write(two.join("shared"), b"common body").unwrap();
    fs::write(two.join("extra"), b"more").unwrap();
    record_tree(&holotree, &two, "v2");

    let index = holotree.load_hashes().unwrap();
    assert_eq!(index.len(), 2);
    let shared = &recorded.root.tree.files["shared"].digest;
    let owners = index.catalogs_of(shared).unwrap();
    assert!(owners.contains("v1") && owners.contains("v2"));
}

#[test]
fn test_record_absorbs_library_named_tree() {
    let temp = TempDir::new().unwrap();
    let holotree = fresh_holotree(&temp);

    // Seed the library with the body through the locator path.
    let seeded = temp.path().join("seeded");
    fs::create_dir_all(&seeded).unwrap();
    fs::write(seeded.join("a.txt"), b"hello").unwrap();
    record_tree(&holotree, &seeded, "v1");

    // A drop folder of library-named objects: a gzip artifact carrying
    // the known body under its digest, plus a stray under a foreign name.
    let drop_dir = temp.path().join("drop");
    fs::create_dir_all(&drop_dir).unwrap();
    let mut encoder = holotree::compress::encoder(Vec::new());
    encoder.write_all(b"hello").unwrap();
    fs::write(drop_dir.join(HELLO_DIGEST), encoder.finish().unwrap()).unwrap();
    fs::write(drop_dir.join("stray.txt"), b"hello").unwrap();

    // No seek prefix: the plain hasher digests the tree and cleans up
    // sources the library index does not know by name.
    let recorded = holotree.record(&drop_dir, None, "v2").unwrap();

    // The gzip artifact hashed as its decompressed body.
    assert_eq!(recorded.root.tree.files[HELLO_DIGEST].digest, HELLO_DIGEST);
    assert_eq!(recorded.root.tree.files["stray.txt"].digest, HELLO_DIGEST);
    assert!(recorded.root.seek.is_empty());

    // Library-named sources survive; the stray was cleaned up.
    assert!(drop_dir.join(HELLO_DIGEST).exists());
    assert!(!drop_dir.join("stray.txt").exists());

    // Every body was already lifted, and the catalog checks out.
    assert!(recorded.stats.is_clean());
    assert_eq!(object_count(&holotree), 1);
    holotree.catalog_check("v2").unwrap();

    // The absorbed catalog materializes like any other.
    let dest = temp.path().join("out");
    holotree.restore("v2", &dest, &HashMap::new()).unwrap();
    assert_eq!(fs::read(dest.join(HELLO_DIGEST)).unwrap(), b"hello");
    assert_eq!(fs::read(dest.join("stray.txt")).unwrap(), b"hello");
}
