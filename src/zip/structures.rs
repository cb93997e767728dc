use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use anyhow::{Result, bail};

/// Compression methods an entry may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl From<u16> for CompressionMethod {
    fn from(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            other => CompressionMethod::Unknown(other),
        }
    }
}

impl std::fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressionMethod::Stored => f.write_str("stored"),
            CompressionMethod::Deflate => f.write_str("deflate"),
            CompressionMethod::Unknown(v) => write!(f, "method {v}"),
        }
    }
}

/// End of Central Directory record, 22 bytes plus comment
pub struct EndOfCentralDirectory {
    pub entries_on_disk: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            bail!("Missing End of Central Directory record");
        }

        // disk numbers at 4..8 are ignored, multi-disk archives are rejected by size checks
        let mut cursor = Cursor::new(&data[8..]);
        Ok(Self {
            entries_on_disk: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    /// Any saturated field means the real values live in the ZIP64 record.
    pub fn needs_zip64(&self) -> bool {
        self.entries_on_disk == u16::MAX
            || self.total_entries == u16::MAX
            || self.cd_size == u32::MAX
            || self.cd_offset == u32::MAX
    }
}

/// ZIP64 End of Central Directory Locator, 20 bytes
pub struct Zip64Locator {
    pub eocd64_offset: u64,
}

impl Zip64Locator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            bail!("Missing ZIP64 End of Central Directory locator");
        }

        let mut cursor = Cursor::new(&data[8..]);
        Ok(Self {
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// ZIP64 End of Central Directory record, 56 bytes minimum
pub struct Zip64EndOfCentralDirectory {
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            bail!("Missing ZIP64 End of Central Directory record");
        }

        // record size, versions and disk numbers occupy bytes 4..24
        let mut cursor = Cursor::new(&data[24..]);
        let _entries_on_disk = cursor.read_u64::<LittleEndian>()?;
        Ok(Self {
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// Central Directory File Header, 46 bytes plus variable fields
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header, 30 bytes plus variable fields
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// Extra field tag carrying 64-bit sizes and offsets
pub const ZIP64_EXTRA_ID: u16 = 0x0001;

const FLAG_ENCRYPTED: u16 = 0x0001;
const FLAG_UTF8: u16 = 0x0800;

const HOST_UNIX: u8 = 3;
const DOS_DIRECTORY_ATTR: u32 = 0x10;
const UNIX_TYPE_MASK: u32 = 0o170000;
const UNIX_DIRECTORY: u32 = 0o040000;

/// One record of the archive's entry index
#[derive(Debug, Clone)]
pub struct ZipFileEntry {
    /// Path inside the archive, `/`-separated
    pub file_name: String,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    pub flags: u16,
    pub is_directory: bool,
}

impl ZipFileEntry {
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }
}

/// Decode an entry name, honoring the language encoding flag.
pub fn decode_name(raw: &[u8], flags: u16) -> String {
    if flags & FLAG_UTF8 != 0 {
        return String::from_utf8_lossy(raw).into_owned();
    }
    // Legacy names are usually ASCII; other bytes map one-to-one onto Latin-1
    match std::str::from_utf8(raw) {
        Ok(name) => name.to_owned(),
        Err(_) => raw.iter().map(|&b| b as char).collect(),
    }
}

/// Whether a header describes a directory, by name or by host attributes.
pub fn is_directory(name: &str, version_made_by: u16, external_attrs: u32) -> bool {
    if name.ends_with('/') {
        return true;
    }
    if external_attrs & DOS_DIRECTORY_ATTR != 0 {
        return true;
    }
    let host = (version_made_by >> 8) as u8;
    host == HOST_UNIX && (external_attrs >> 16) & UNIX_TYPE_MASK == UNIX_DIRECTORY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_detection() {
        assert!(is_directory("assets/", 0x0314, 0));
        assert!(is_directory("assets", 0x0014, DOS_DIRECTORY_ATTR));
        assert!(is_directory("assets", 0x0314, (0o040755) << 16));
        assert!(!is_directory("pack.png", 0x0314, (0o100644) << 16));
        // unix mode bits are meaningless for a DOS host
        assert!(!is_directory("pack.png", 0x0014, (0o040755) << 16));
    }

    #[test]
    fn eocd_saturated_fields_need_zip64() {
        let mut raw = vec![0u8; EndOfCentralDirectory::SIZE];
        raw[0..4].copy_from_slice(EndOfCentralDirectory::SIGNATURE);
        raw[16..20].copy_from_slice(&u32::MAX.to_le_bytes());
        let eocd = EndOfCentralDirectory::from_bytes(&raw).unwrap();
        assert!(eocd.needs_zip64());

        raw[16..20].copy_from_slice(&64u32.to_le_bytes());
        let eocd = EndOfCentralDirectory::from_bytes(&raw).unwrap();
        assert!(!eocd.needs_zip64());
        assert_eq!(eocd.cd_offset, 64);
    }

    #[test]
    fn names_without_utf8_flag_fall_back_to_latin1() {
        assert_eq!(decode_name(b"plain.txt", 0), "plain.txt");
        assert_eq!(decode_name(&[0x63, 0xE9, 0x2E, 0x74], 0), "c\u{e9}.t");
        assert_eq!(decode_name("é.txt".as_bytes(), FLAG_UTF8), "é.txt");
    }
}
