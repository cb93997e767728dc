//! Read-only ZIP archive access.
//!
//! - [`structures`]: on-disk records and the parsed [`ZipFileEntry`]
//! - [`parser`]: End of Central Directory lookup and central directory parsing
//! - [`archive`]: the [`ZipArchive`] handle that decodes entry data
//!
//! Standard and ZIP64 archives are supported, with STORED and DEFLATE
//! entries. Encrypted entries and multi-disk archives are not.

mod archive;
mod parser;
mod structures;

pub use archive::ZipArchive;
pub use parser::ZipParser;
pub use structures::*;
