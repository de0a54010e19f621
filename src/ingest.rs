//! Ingest pipeline: digesting source trees and lifting bodies into the
//! library
//!
//! Ingest has two phases. The digesting passes ([`hash_tree`],
//! [`locate_tree`]) walk an on-disk tree and fill in every file's digest
//! and, for the locator, the byte offsets of a configured seek prefix.
//! [`schedule_lifters`] then deduplicates by digest and submits one
//! [`lift_file`] unit per body the library does not hold yet.
//!
//! Digesting mutates the tree, so it runs as a rayon parallel pass over the
//! collected file slots rather than through the worker pool; lifting and
//! deferred source removal are pool units like everything else that only
//! touches the disk.

use crate::compress;
use crate::error::{HoloError, Result};
use crate::library::{partial_for, MutableLibrary};
use crate::restore::remove_file;
use crate::retry::try_rename;
use crate::tree::{Root, TreeStats};
use crate::worker::WorkerPool;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

const READ_BUFFER: usize = 64 * 1024;

/// Streaming multi-match scanner for the locator
///
/// Feeds arbitrary chunk boundaries; a carryover tail one byte shorter than
/// the needle makes matches that straddle chunks come out exactly once.
/// Offsets are absolute positions in the scanned stream.
#[derive(Debug)]
pub struct SeekScanner {
    needle: Vec<u8>,
    tail: Vec<u8>,
    consumed: u64,
    hits: Vec<u64>,
}

impl SeekScanner {
    /// Create a scanner for `needle`. An empty needle never matches.
    pub fn new(needle: &[u8]) -> Self {
        SeekScanner {
            needle: needle.to_vec(),
            tail: Vec::new(),
            consumed: 0,
            hits: Vec::new(),
        }
    }

    /// Feed the next chunk of the stream.
    pub fn update(&mut self, chunk: &[u8]) {
        if self.needle.is_empty() {
            self.consumed += chunk.len() as u64;
            return;
        }
        let window_start = self.consumed - self.tail.len() as u64;
        let mut window = std::mem::take(&mut self.tail);
        window.extend_from_slice(chunk);
        if window.len() >= self.needle.len() {
            for at in 0..=(window.len() - self.needle.len()) {
                if window[at..at + self.needle.len()] == self.needle[..] {
                    self.hits.push(window_start + at as u64);
                }
            }
        }
        let keep = window.len().min(self.needle.len() - 1);
        self.tail = window[window.len() - keep..].to_vec();
        self.consumed += chunk.len() as u64;
    }

    /// Start offsets of every match, in stream order.
    pub fn hits(self) -> Vec<u64> {
        self.hits
    }
}

/// Digest of the logical uncompressed body of a source file.
///
/// Files that are already gzip artifacts hash as their decompressed
/// contents; anything else hashes raw. Only the header decides: a valid
/// gzip header followed by a broken stream is fatal, there is no raw
/// fallback past that point.
pub fn digest_of(path: &Path) -> Result<String> {
    let mut source =
        fs::File::open(path).map_err(|source| HoloError::path_io("open", path, source))?;
    let gzipped = compress::sniff_gzip(&mut source)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER];
    if gzipped {
        let mut reader = compress::decoder(BufReader::new(source));
        loop {
            let n = reader
                .read(&mut buffer)
                .map_err(|source| HoloError::path_io("read", path, source))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
    } else {
        let mut reader = BufReader::new(source);
        loop {
            let n = reader
                .read(&mut buffer)
                .map_err(|source| HoloError::path_io("read", path, source))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Digest a raw stream while locating every occurrence of `seek`.
fn digest_and_locate(path: &Path, seek: &[u8]) -> Result<(String, Vec<u64>)> {
    let source =
        fs::File::open(path).map_err(|source| HoloError::path_io("open", path, source))?;
    let mut reader = BufReader::new(source);
    let mut hasher = Sha256::new();
    let mut scanner = SeekScanner::new(seek);
    let mut buffer = vec![0u8; READ_BUFFER];
    loop {
        let n = reader
            .read(&mut buffer)
            .map_err(|source| HoloError::path_io("read", path, source))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        scanner.update(&buffer[..n]);
    }
    Ok((hex::encode(hasher.finalize()), scanner.hits()))
}

/// Digest every file in the tree, gzip-aware.
///
/// Files whose name is absent from `known` get their source scheduled for
/// deferred removal on the pool; the caller owns the following `sync()`.
pub fn hash_tree(root: &mut Root, known: &HashSet<String>, pool: &WorkerPool) -> Result<()> {
    let mut slots = Vec::new();
    let base = root.path.clone();
    root.tree.collect_files_mut(&base, &mut slots);

    let outcomes: Vec<Result<Option<PathBuf>>> = slots
        .par_iter_mut()
        .map(|(path, file)| {
            file.digest = digest_of(path)?;
            if known.contains(&file.name) {
                Ok(None)
            } else {
                Ok(Some(path.clone()))
            }
        })
        .collect();

    for outcome in outcomes {
        if let Some(stray) = outcome? {
            trace!("scheduling removal of unknown source {:?}", stray);
            pool.submit(remove_file(stray));
        }
    }
    Ok(())
}

/// Digest every file in the tree while recording rewrite offsets for
/// `seek`. The digest covers the unmodified stream.
pub fn locate_tree(root: &mut Root, seek: &str) -> Result<()> {
    root.seek = seek.to_string();
    let needle = seek.as_bytes().to_vec();
    let mut slots = Vec::new();
    let base = root.path.clone();
    root.tree.collect_files_mut(&base, &mut slots);

    slots
        .par_iter_mut()
        .map(|(path, file)| {
            let (digest, hits) = digest_and_locate(path, &needle)?;
            file.digest = digest;
            file.rewrite = hits;
            Ok(())
        })
        .collect::<Result<Vec<()>>>()?;
    Ok(())
}

/// Work unit: compress one source body into the library.
///
/// The body streams through a best-speed gzip writer into a uniquely named
/// partial sibling of the sink, then renames into place. Concurrent lifts
/// of the same digest race benignly; the partial is removed on any failure.
pub fn lift_file(source: PathBuf, sink: PathBuf) -> impl FnOnce() -> Result<()> + Send + 'static {
    move || {
        let src =
            fs::File::open(&source).map_err(|source_err| HoloError::path_io("open", &source, source_err))?;
        let partial = partial_for(&sink);
        let outcome = (|| -> Result<()> {
            let out = fs::File::create(&partial)
                .map_err(|source_err| HoloError::path_io("create", &partial, source_err))?;
            let mut writer = compress::encoder(BufWriter::new(out));
            std::io::copy(&mut BufReader::new(src), &mut writer)
                .map_err(|source_err| HoloError::path_io("copy", &source, source_err))?;
            let inner = writer.finish()?;
            inner
                .into_inner()
                .map_err(|err| HoloError::path_io("flush", &partial, err.into_error()))?;
            std::thread::yield_now();
            try_rename("liftfile", &partial, &sink)
        })();
        if outcome.is_err() {
            let _ = fs::remove_file(&partial);
        }
        outcome
    }
}

/// Walk the tree post-order and submit one lift unit per digest the
/// library does not hold yet.
///
/// Every unique digest counts one stats decision: dirty when a lift was
/// scheduled, clean when the body was already present.
pub fn schedule_lifters(
    library: &dyn MutableLibrary,
    root: &Root,
    stats: &TreeStats,
    pool: &WorkerPool,
) -> Result<()> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut shards: HashSet<PathBuf> = HashSet::new();
    let mut scheduled = 0usize;
    root.tree.walk_post(&root.path, &mut |path, dir| {
        for (name, file) in &dir.files {
            if !seen.insert(file.digest.clone()) {
                trace!("lift of {} for {:?} already scheduled", file.digest, name);
                continue;
            }
            let sink = if shards.insert(library.location(&file.digest)) {
                library.ensure_location(&file.digest)?
            } else {
                library.exact_location(&file.digest)
            };
            let present = sink.is_file();
            stats.dirty(!present);
            if present {
                continue;
            }
            scheduled += 1;
            pool.submit(lift_file(path.join(name), sink));
        }
        Ok(())
    })?;
    debug!("{} lift units scheduled", scheduled);
    Ok(())
}
