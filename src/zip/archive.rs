//! Opened archives and entry decoding.
//!
//! [`ZipArchive`] pairs a parsed entry index with the [`ReadAt`] source it came
//! from. Reading an entry locates its data through the local header, fetches
//! the compressed bytes with one positional read, and inflates them on the
//! blocking pool. Only stored and deflated entries are supported; encrypted
//! entries and other methods fail on their own without affecting the rest of
//! the archive.
//!
//! Decoded data is checked against the declared uncompressed size and CRC-32
//! before it is returned.

use flate2::Crc;
use flate2::read::DeflateDecoder;
use std::io::Read;
use std::sync::Arc;

use crate::io::ReadAt;
use anyhow::{Context, Result, bail};

use super::parser::ZipParser;
use super::structures::{CompressionMethod, ZipFileEntry};

/// Upper bound on the buffer reserved up front from a declared entry size.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Read-only handle over an opened archive.
///
/// Owns the data source and the entry index. Entries are read with positional
/// reads only, so `&ZipArchive` can be shared across tasks that extract
/// different entries at the same time.
pub struct ZipArchive<R: ReadAt> {
    parser: ZipParser<R>,
    entries: Vec<ZipFileEntry>,
}

impl<R: ReadAt + 'static> ZipArchive<R> {
    /// Parse the central directory of `reader`.
    ///
    /// # Arguments
    ///
    /// * `reader` - The archive bytes, shared with every later entry read
    ///
    /// # Returns
    ///
    /// An archive whose [`entries`](Self::entries) are in central directory
    /// order.
    ///
    /// # Errors
    ///
    /// Fails with "Not a valid zip archive" when the source is too small, has
    /// no End of Central Directory record, or has a malformed directory.
    pub async fn open(reader: Arc<R>) -> Result<Self> {
        let parser = ZipParser::new(reader);
        let entries = parser
            .read_directory()
            .await
            .context("Not a valid zip archive")?;
        Ok(Self { parser, entries })
    }

    /// Every entry in central directory order, directories included.
    pub fn entries(&self) -> &[ZipFileEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read and decode one entry, verifying its size and CRC-32.
    ///
    /// # Arguments
    ///
    /// * `entry` - One of this archive's [`entries`](Self::entries)
    ///
    /// # Returns
    ///
    /// The whole uncompressed contents of the entry.
    ///
    /// # Errors
    ///
    /// * `entry` is a directory, is encrypted, or uses a compression method
    ///   other than stored or deflate
    /// * The local header is invalid or the data runs past the archive
    /// * The deflate stream is corrupt
    /// * The decoded size or CRC-32 differs from the central directory
    pub async fn read_entry(&self, entry: &ZipFileEntry) -> Result<Vec<u8>> {
        if entry.is_directory {
            bail!("{} is a directory", entry.file_name);
        }
        if entry.is_encrypted() {
            bail!("Encrypted entries are not supported");
        }
        if !matches!(
            entry.compression_method,
            CompressionMethod::Stored | CompressionMethod::Deflate
        ) {
            bail!(
                "Unsupported compression method: {}",
                entry.compression_method
            );
        }

        let offset = self.parser.data_offset(entry).await?;
        let mut raw = vec![0u8; entry.compressed_size as usize];
        self.parser.reader().read_exact_at(offset, &mut raw).await?;

        let entry = entry.clone();
        tokio::task::spawn_blocking(move || decode(&entry, raw))
            .await
            .context("Decoder task failed")?
    }
}

fn decode(entry: &ZipFileEntry, raw: Vec<u8>) -> Result<Vec<u8>> {
    let data = match entry.compression_method {
        CompressionMethod::Stored => raw,
        CompressionMethod::Deflate => {
            let mut out = Vec::with_capacity(entry.uncompressed_size.min(MAX_PREALLOC) as usize);
            // take() guards against a stream that inflates past its declared size
            DeflateDecoder::new(raw.as_slice())
                .take(entry.uncompressed_size.saturating_add(1))
                .read_to_end(&mut out)
                .context("Corrupt deflate stream")?;
            out
        }
        CompressionMethod::Unknown(_) => {
            bail!("Unsupported compression method: {}", entry.compression_method)
        }
    };

    if data.len() as u64 != entry.uncompressed_size {
        bail!(
            "Size mismatch: expected {} bytes, got {}",
            entry.uncompressed_size,
            data.len()
        );
    }

    let mut crc = Crc::new();
    crc.update(&data);
    if crc.sum() != entry.crc32 {
        bail!(
            "CRC-32 mismatch: expected {:08x}, got {:08x}",
            entry.crc32,
            crc.sum()
        );
    }

    Ok(data)
}
