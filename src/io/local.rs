use super::ReadAt;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;

/// Read-only archive file shared by all extraction tasks.
///
/// Reads go through `pread`-style calls that never touch a shared cursor, so
/// one handle serves any number of concurrent entries.
pub struct LocalFileReader {
    file: std::fs::File,
    size: u64,
}

impl LocalFileReader {
    pub fn new(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Error opening zip file {}", path.display()))?;
        let metadata = file
            .metadata()
            .with_context(|| format!("Error reading metadata of {}", path.display()))?;
        if metadata.is_dir() {
            anyhow::bail!("Error opening zip file {}: is a directory", path.display());
        }
        Ok(Self {
            file,
            size: metadata.len(),
        })
    }
}

#[async_trait]
impl ReadAt for LocalFileReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            Ok(self.file.read_at(buf, offset)?)
        }

        #[cfg(windows)]
        {
            // seek_read moves the OS cursor, but every caller passes its own offset
            use std::os::windows::fs::FileExt;
            Ok(self.file.seek_read(buf, offset)?)
        }

        #[cfg(not(any(unix, windows)))]
        {
            let _ = (offset, buf);
            anyhow::bail!("Positional reads are not supported on this platform")
        }
    }

    fn size(&self) -> u64 {
        self.size
    }
}
