//! Gzip plumbing for the object library
//!
//! Library objects are raw gzip streams written at best-speed level; the
//! digest contract is always about the decompressed body. This module owns
//! the codec choices so call sites never spell out compression levels, and
//! provides the header sniff the ingest hasher uses to decide whether a
//! source file is already a gzip artifact.

use crate::error::Result;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Seek, SeekFrom, Write};

/// Magic prefix of a gzip member with deflate compression.
const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];

/// Wrap a sink in a best-speed gzip encoder.
pub fn encoder<W: Write>(sink: W) -> GzEncoder<W> {
    GzEncoder::new(sink, Compression::fast())
}

/// Wrap a source in a gzip decoder.
pub fn decoder<R: Read>(source: R) -> GzDecoder<R> {
    GzDecoder::new(source)
}

/// Check whether a seekable source starts with a gzip header, rewinding it
/// to the start afterwards.
///
/// Only the header is inspected here. A valid header followed by a broken
/// stream is a hard error for whoever reads the stream; there is no raw
/// fallback after this point.
pub fn sniff_gzip<R: Read + Seek>(source: &mut R) -> Result<bool> {
    let mut magic = [0u8; 3];
    let mut filled = 0;
    while filled < magic.len() {
        let n = source.read(&mut magic[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    source.seek(SeekFrom::Start(0))?;
    Ok(filled == magic.len() && magic == GZIP_MAGIC)
}
