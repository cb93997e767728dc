//! Central directory parser.
//!
//! ZIP archives are read from the end: the End of Central Directory record
//! points at the central directory, which indexes every entry together with
//! the offset of its local header. Entry data is located lazily, one local
//! header per extraction.
//!
//! ## ZIP64
//!
//! Archives with more than 65,535 entries, or with sizes and offsets past
//! 4 GiB, saturate the classic 16 and 32-bit fields. The parser then follows
//! the ZIP64 locator that sits just before the classic record to the ZIP64
//! End of Central Directory, and reads saturated per-entry values from the
//! ZIP64 extra field (id `0x0001`) of each central directory header.
//!
//! ## Bounds
//!
//! Every offset and count read from the archive is checked against the file
//! size before it is used to allocate or read, so a corrupt directory fails
//! with an error instead of a huge allocation.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::io::ReadAt;
use anyhow::{Context, Result, bail};

use super::structures::*;

/// Largest archive comment the format can carry.
const MAX_COMMENT_SIZE: u64 = u16::MAX as u64;

/// Sentinel meaning "the real value is in the ZIP64 extra field".
const ZIP64_SENTINEL: u64 = u32::MAX as u64;

/// Reads the entry index of an archive through a [`ReadAt`] source.
pub struct ZipParser<R: ReadAt> {
    reader: Arc<R>,
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Locate the End of Central Directory record.
    ///
    /// Returns the record and its offset. Archives without a comment are
    /// resolved with one small read; otherwise the tail is scanned backwards.
    pub async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        let eocd_size = EndOfCentralDirectory::SIZE as u64;
        if self.size < eocd_size {
            bail!("File is too small to be a zip archive ({} bytes)", self.size);
        }

        let offset = self.size - eocd_size;
        let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
        self.reader.read_exact_at(offset, &mut buf).await?;
        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && buf[20..22] == [0, 0] {
            return Ok((EndOfCentralDirectory::from_bytes(&buf)?, offset));
        }

        let tail_len = (MAX_COMMENT_SIZE + eocd_size).min(self.size);
        let tail_start = self.size - tail_len;
        let mut tail = vec![0u8; tail_len as usize];
        self.reader.read_exact_at(tail_start, &mut tail).await?;

        let last_candidate = tail.len() - EndOfCentralDirectory::SIZE;
        for i in (0..=last_candidate).rev() {
            if &tail[i..i + 4] != EndOfCentralDirectory::SIGNATURE {
                continue;
            }
            let comment_len = u16::from_le_bytes([tail[i + 20], tail[i + 21]]) as usize;
            if i + EndOfCentralDirectory::SIZE + comment_len == tail.len() {
                let eocd = EndOfCentralDirectory::from_bytes(&tail[i..])?;
                return Ok((eocd, tail_start + i as u64));
            }
        }

        bail!("End of Central Directory record not found")
    }

    async fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Zip64EndOfCentralDirectory> {
        let locator_offset = eocd_offset
            .checked_sub(Zip64Locator::SIZE as u64)
            .context("Truncated ZIP64 End of Central Directory locator")?;
        let mut buf = vec![0u8; Zip64Locator::SIZE];
        self.reader.read_exact_at(locator_offset, &mut buf).await?;
        let locator = Zip64Locator::from_bytes(&buf)?;

        let mut buf = vec![0u8; Zip64EndOfCentralDirectory::MIN_SIZE];
        self.reader
            .read_exact_at(locator.eocd64_offset, &mut buf)
            .await?;
        Zip64EndOfCentralDirectory::from_bytes(&buf)
    }

    /// Read and parse the whole central directory.
    ///
    /// The directory is fetched with a single positional read and parsed in
    /// memory, falling back to the ZIP64 records when the classic End of
    /// Central Directory fields are saturated.
    ///
    /// # Returns
    ///
    /// Every entry in central directory order, directories included.
    ///
    /// # Errors
    ///
    /// * No End of Central Directory record in the last 64 KiB of the file
    /// * A directory extent that runs into the End of Central Directory record
    /// * An entry count the directory size cannot hold
    /// * A malformed header, reported with its index
    pub async fn read_directory(&self) -> Result<Vec<ZipFileEntry>> {
        let (eocd, eocd_offset) = self.find_eocd().await?;

        let (cd_offset, cd_size, total_entries) = if eocd.needs_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset).await?;
            (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries)
        } else {
            (
                u64::from(eocd.cd_offset),
                u64::from(eocd.cd_size),
                u64::from(eocd.total_entries),
            )
        };

        match cd_offset.checked_add(cd_size) {
            Some(end) if end <= eocd_offset => {}
            _ => bail!(
                "Central directory ({} bytes at offset {}) lies outside the archive",
                cd_size,
                cd_offset
            ),
        }
        // Every header is at least CDFH_MIN_SIZE bytes, which caps the entry count
        if total_entries > cd_size / CDFH_MIN_SIZE as u64 {
            bail!(
                "Central directory of {} bytes cannot hold {} entries",
                cd_size,
                total_entries
            );
        }

        let mut directory = vec![0u8; cd_size as usize];
        self.reader.read_exact_at(cd_offset, &mut directory).await?;

        let mut cursor = Cursor::new(directory.as_slice());
        let mut entries = Vec::with_capacity(total_entries as usize);
        for index in 0..total_entries {
            let entry = parse_cdfh(&mut cursor)
                .with_context(|| format!("Malformed central directory header #{index}"))?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Offset of an entry's data, just past its local file header.
    ///
    /// The local header repeats the name and may carry a different extra
    /// field than the central directory, so its own lengths are used.
    ///
    /// # Arguments
    ///
    /// * `entry` - An entry returned by [`ZipParser::read_directory`]
    ///
    /// # Returns
    ///
    /// The absolute offset of the first compressed byte.
    ///
    /// # Errors
    ///
    /// Fails when the local header is unreadable or has a bad signature, or
    /// when `compressed_size` bytes from the returned offset would run past
    /// the end of the archive.
    pub async fn data_offset(&self, entry: &ZipFileEntry) -> Result<u64> {
        let mut lfh = [0u8; LFH_SIZE];
        self.reader.read_exact_at(entry.lfh_offset, &mut lfh).await?;
        if &lfh[0..4] != LFH_SIGNATURE {
            bail!("Invalid local file header at offset {}", entry.lfh_offset);
        }

        // name and extra lengths sit at the end of the fixed part
        let name_len = u64::from(u16::from_le_bytes([lfh[26], lfh[27]]));
        let extra_len = u64::from(u16::from_le_bytes([lfh[28], lfh[29]]));
        let offset = entry.lfh_offset + LFH_SIZE as u64 + name_len + extra_len;

        if offset.saturating_add(entry.compressed_size) > self.size {
            bail!("Entry data runs past the end of the archive");
        }
        Ok(offset)
    }

    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }
}

fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> Result<ZipFileEntry> {
    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig)?;
    if sig != CDFH_SIGNATURE {
        bail!("Invalid Central Directory File Header signature");
    }

    let version_made_by = cursor.read_u16::<LittleEndian>()?;
    let _version_needed = cursor.read_u16::<LittleEndian>()?;
    let flags = cursor.read_u16::<LittleEndian>()?;
    let method = cursor.read_u16::<LittleEndian>()?;
    let _mod_time = cursor.read_u16::<LittleEndian>()?;
    let _mod_date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let mut compressed_size = u64::from(cursor.read_u32::<LittleEndian>()?);
    let mut uncompressed_size = u64::from(cursor.read_u32::<LittleEndian>()?);
    let name_len = cursor.read_u16::<LittleEndian>()?;
    let extra_len = cursor.read_u16::<LittleEndian>()?;
    let comment_len = cursor.read_u16::<LittleEndian>()?;
    let _disk_start = cursor.read_u16::<LittleEndian>()?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
    let external_attrs = cursor.read_u32::<LittleEndian>()?;
    let mut lfh_offset = u64::from(cursor.read_u32::<LittleEndian>()?);

    let mut raw_name = vec![0u8; name_len as usize];
    cursor.read_exact(&mut raw_name)?;
    let file_name = decode_name(&raw_name, flags);

    let mut extra = vec![0u8; extra_len as usize];
    cursor.read_exact(&mut extra)?;
    let mut extra = Cursor::new(extra.as_slice());
    while (extra.get_ref().len() as u64).saturating_sub(extra.position()) >= 4 {
        let id = extra.read_u16::<LittleEndian>()?;
        let len = u64::from(extra.read_u16::<LittleEndian>()?);
        let field_end = extra.position() + len;

        if id == ZIP64_EXTRA_ID {
            // only the saturated header fields are present, in this order
            if uncompressed_size == ZIP64_SENTINEL && extra.position() + 8 <= field_end {
                uncompressed_size = extra.read_u64::<LittleEndian>()?;
            }
            if compressed_size == ZIP64_SENTINEL && extra.position() + 8 <= field_end {
                compressed_size = extra.read_u64::<LittleEndian>()?;
            }
            if lfh_offset == ZIP64_SENTINEL && extra.position() + 8 <= field_end {
                lfh_offset = extra.read_u64::<LittleEndian>()?;
            }
        }
        extra.set_position(field_end);
    }

    cursor.set_position(cursor.position() + u64::from(comment_len));
    if cursor.position() > cursor.get_ref().len() as u64 {
        bail!("Truncated file comment");
    }

    let is_directory = is_directory(&file_name, version_made_by, external_attrs);
    Ok(ZipFileEntry {
        file_name,
        compression_method: CompressionMethod::from(method),
        compressed_size,
        uncompressed_size,
        crc32,
        lfh_offset,
        flags,
        is_directory,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    /// Central directory header for `big/asset.bin`, with the given 32-bit
    /// fields and a ZIP64 extra field holding `extra_values` in order.
    fn cdfh(compressed: u32, uncompressed: u32, lfh_offset: u32, extra_values: &[u64]) -> Vec<u8> {
        let name = b"big/asset.bin";

        let mut extra = Vec::new();
        extra.write_u16::<LittleEndian>(ZIP64_EXTRA_ID).unwrap();
        extra.write_u16::<LittleEndian>((extra_values.len() * 8) as u16).unwrap();
        for value in extra_values {
            extra.write_u64::<LittleEndian>(*value).unwrap();
        }

        let mut raw = Vec::new();
        raw.extend_from_slice(CDFH_SIGNATURE);
        raw.write_u16::<LittleEndian>(0x032D).unwrap(); // made by: unix, 4.5
        raw.write_u16::<LittleEndian>(45).unwrap();
        raw.write_u16::<LittleEndian>(0).unwrap();
        raw.write_u16::<LittleEndian>(8).unwrap();
        raw.write_u16::<LittleEndian>(0).unwrap();
        raw.write_u16::<LittleEndian>(0).unwrap();
        raw.write_u32::<LittleEndian>(0xDEAD_BEEF).unwrap();
        raw.write_u32::<LittleEndian>(compressed).unwrap();
        raw.write_u32::<LittleEndian>(uncompressed).unwrap();
        raw.write_u16::<LittleEndian>(name.len() as u16).unwrap();
        raw.write_u16::<LittleEndian>(extra.len() as u16).unwrap();
        raw.write_u16::<LittleEndian>(0).unwrap();
        raw.write_u16::<LittleEndian>(0).unwrap();
        raw.write_u16::<LittleEndian>(0).unwrap();
        raw.write_u32::<LittleEndian>(0o100644 << 16).unwrap();
        raw.write_u32::<LittleEndian>(lfh_offset).unwrap();
        raw.extend_from_slice(name);
        raw.extend_from_slice(&extra);
        raw
    }

    #[test]
    fn zip64_extra_field_replaces_saturated_values() {
        let raw = cdfh(
            u32::MAX,
            u32::MAX,
            u32::MAX,
            &[5_000_000_000, 4_500_000_000, 6_000_000_000],
        );
        let mut cursor = Cursor::new(raw.as_slice());
        let entry = parse_cdfh(&mut cursor).unwrap();

        assert_eq!(entry.file_name, "big/asset.bin");
        assert_eq!(entry.uncompressed_size, 5_000_000_000);
        assert_eq!(entry.compressed_size, 4_500_000_000);
        assert_eq!(entry.lfh_offset, 6_000_000_000);
        assert_eq!(entry.crc32, 0xDEAD_BEEF);
        assert_eq!(entry.compression_method, CompressionMethod::Deflate);
        assert!(!entry.is_directory);
        assert_eq!(cursor.position(), raw.len() as u64);
    }

    #[test]
    fn only_saturated_fields_come_from_the_extra() {
        // compressed size fits in 32 bits, so the extra skips it
        let raw = cdfh(1234, u32::MAX, u32::MAX, &[5_000_000_000, 7_000_000_000]);
        let entry = parse_cdfh(&mut Cursor::new(raw.as_slice())).unwrap();

        assert_eq!(entry.compressed_size, 1234);
        assert_eq!(entry.uncompressed_size, 5_000_000_000);
        assert_eq!(entry.lfh_offset, 7_000_000_000);
    }

    #[test]
    fn truncated_header_is_an_error() {
        let raw = cdfh(1, 1, 0, &[]);
        let short = &raw[..CDFH_MIN_SIZE + 3];
        assert!(parse_cdfh(&mut Cursor::new(short)).is_err());
    }
}
