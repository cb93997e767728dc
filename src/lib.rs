//! # mirp
//!
//! Extracts every file of a ZIP archive into a folder named after the file,
//! renaming it to a common tag. Built for indexing Minecraft resource packs,
//! where many versions of the same asset are collected side by side:
//!
//! ```text
//! pack.zip: assets/minecraft/textures/block/stone.png
//! tag v1  : out/assets/minecraft/textures/block/stone/v1.png
//! ```
//!
//! Entries are extracted concurrently, one task per file, over a single
//! read-only archive handle.
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use mirp::Extractor;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let summary = Extractor::new("v1")
//!         .with_max_jobs(16)
//!         .list_and_extract_zip_contents(Path::new("pack.zip"), Path::new("out"))
//!         .await?;
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod extract;
pub mod io;
pub mod layout;
pub mod progress;
pub mod zip;

pub use cli::Cli;
pub use extract::{ExtractionSummary, Extractor, extract_file};
pub use io::{LocalFileReader, ReadAt};
pub use progress::Progress;
pub use crate::zip::{ZipArchive, ZipFileEntry};
