//! Tagged extraction: every file entry goes to its own folder, renamed to the
//! tag plus its original extension.
//!
//! An [`Extractor`] first turns the archive's entry list into a
//! [`layout::ExtractionPlan`]. Unsafe names are counted as failed and entries
//! whose output collides with an earlier entry are counted as skipped before
//! any task starts. Every remaining entry is extracted on its own task in a
//! [`JoinSet`], optionally bounded by a semaphore. Each task creates its own
//! folder and owns its output file exclusively, so tasks never share a handle.
//!
//! Failures never stop a run: they are logged through [`Progress`] and show up
//! in the [`ExtractionSummary`]. Only an archive that cannot be opened at all
//! is returned as an error.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::io::{LocalFileReader, ReadAt};
use crate::layout::{self, ExtractionJob};
use crate::progress::Progress;
use crate::zip::ZipArchive;

/// Outcome of a whole run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub destination: PathBuf,
    /// File entries in the archive, directories excluded
    pub files: usize,
    pub extracted: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ExtractionSummary {
    pub fn is_complete(&self) -> bool {
        self.extracted == self.files
    }
}

impl std::fmt::Display for ExtractionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_complete() {
            write!(f, "All files extracted to {}", self.destination.display())
        } else {
            write!(
                f,
                "Extracted {} of {} files to {} ({} failed, {} skipped)",
                self.extracted,
                self.files,
                self.destination.display(),
                self.failed,
                self.skipped
            )
        }
    }
}

/// Extracts archives into per-entry folders named after their entries.
#[derive(Debug, Clone)]
pub struct Extractor {
    tag: String,
    max_jobs: Option<usize>,
}

impl Extractor {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            max_jobs: None,
        }
    }

    /// Cap the number of entries extracted at once. `0` means no cap.
    pub fn with_max_jobs(mut self, jobs: usize) -> Self {
        self.max_jobs = (jobs > 0).then_some(jobs);
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Open the archive at `zip_path` and extract every file entry under
    /// `extract_to`, reporting through a progress bar on stderr.
    ///
    /// Fails only if the archive cannot be opened; per-entry failures are
    /// logged and counted in the returned summary.
    pub async fn list_and_extract_zip_contents(
        &self,
        zip_path: &Path,
        extract_to: &Path,
    ) -> Result<ExtractionSummary> {
        let reader = Arc::new(LocalFileReader::new(zip_path)?);
        let archive = ZipArchive::open(reader)
            .await
            .with_context(|| format!("Error opening zip file {}", zip_path.display()))?;

        let progress = Arc::new(Progress::new(archive.len() as u64));
        progress.info(&format!(
            "Extracting {} with tag {}",
            zip_path.display(),
            self.tag
        ));
        self.extract_archive(archive, extract_to, progress).await
    }

    /// Extract an already opened archive, reporting through `progress`.
    ///
    /// # Arguments
    ///
    /// * `archive` - The opened archive, shared by every extraction task
    /// * `extract_to` - Destination root, created on demand
    /// * `progress` - Receives one outcome per file entry
    ///
    /// # Returns
    ///
    /// The run's [`ExtractionSummary`]. Entries with unsafe names count as
    /// failed, colliding entries as skipped, and a task that panics as failed.
    ///
    /// # Errors
    ///
    /// None in practice: per-entry failures are reported through `progress`
    /// and counted in the summary instead of being returned.
    pub async fn extract_archive<R: ReadAt + 'static>(
        &self,
        archive: ZipArchive<R>,
        extract_to: &Path,
        progress: Arc<Progress>,
    ) -> Result<ExtractionSummary> {
        let plan = layout::plan(archive.entries(), extract_to, &self.tag);
        let files = plan.file_count();

        for rejected in &plan.rejected {
            progress.entry_failed(&rejected.entry, &rejected.error);
        }
        for collision in &plan.collisions {
            progress.entry_skipped(
                &collision.entry,
                &format!(
                    "{} is already claimed by {}",
                    collision.path.display(),
                    collision.kept
                ),
            );
        }

        let archive = Arc::new(archive);
        let limit = self.max_jobs.map(|n| Arc::new(Semaphore::new(n)));
        let mut tasks = JoinSet::new();

        for job in plan.jobs {
            let archive = Arc::clone(&archive);
            let progress = Arc::clone(&progress);
            let limit = limit.clone();
            tasks.spawn(async move {
                // held until the entry is written
                let _permit = match limit {
                    Some(semaphore) => Some(semaphore.acquire_owned().await?),
                    None => None,
                };
                extract_file(&archive, &job, &progress).await;
                anyhow::Ok(())
            });
        }

        join_all(&mut tasks, &progress).await;
        progress.finish();

        Ok(ExtractionSummary {
            destination: extract_to.to_path_buf(),
            files,
            extracted: progress.extracted(),
            failed: progress.failed(),
            skipped: progress.skipped(),
        })
    }
}

/// Wait for every task, reporting tasks that died before reporting themselves.
async fn join_all(tasks: &mut JoinSet<Result<()>>, progress: &Progress) {
    while let Some(joined) = tasks.join_next().await {
        let error = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e,
            Err(e) => anyhow::Error::new(e).context("Extraction task panicked"),
        };
        progress.entry_failed("archive entry", &error);
    }
}

/// Extract one entry to its tagged path.
///
/// Creates the entry's folder, copies the decoded bytes into the output file
/// and reports the outcome. Errors are reported, never returned, so a failing
/// entry does not disturb the others. Handles are closed on every path.
pub async fn extract_file<R: ReadAt + 'static>(
    archive: &ZipArchive<R>,
    job: &ExtractionJob,
    progress: &Progress,
) {
    let name = &job.entry.file_name;
    match write_entry(archive, job).await {
        Ok(()) => progress.entry_extracted(name, &job.output.file),
        Err(e) => progress.entry_failed(name, &e),
    }
}

async fn write_entry<R: ReadAt + 'static>(
    archive: &ZipArchive<R>,
    job: &ExtractionJob,
) -> Result<()> {
    let output = &job.output;

    create_dir_all(&output.dir)
        .await
        .with_context(|| format!("Error creating directory {}", output.dir.display()))?;

    let data = archive
        .read_entry(&job.entry)
        .await
        .with_context(|| format!("Error opening file {}", job.entry.file_name))?;

    let mut file = fs::File::create(&output.file)
        .await
        .with_context(|| format!("Error creating file {}", output.file.display()))?;

    let written = async {
        tokio::io::copy(&mut data.as_slice(), &mut file).await?;
        file.flush().await
    };
    written
        .await
        .with_context(|| format!("Error writing to file {}", output.file.display()))?;

    Ok(())
}

async fn create_dir_all(path: &Path) -> std::io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o777);
    builder.create(path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, files: &[(&str, &str)]) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, data) in files {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data.as_bytes()).unwrap();
            }
        }
        writer.finish().unwrap();
    }

    async fn run(extractor: &Extractor, zip: &Path, out: &Path) -> ExtractionSummary {
        let reader = Arc::new(LocalFileReader::new(zip).unwrap());
        let archive = ZipArchive::open(reader).await.unwrap();
        let progress = Arc::new(Progress::hidden(archive.len() as u64));
        extractor
            .extract_archive(archive, out, progress)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn renames_every_entry_to_the_tag() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("pack.zip");
        let out = dir.path().join("out");
        write_zip(
            &zip,
            &[
                ("a/", ""),
                ("a/x.json", "{\"x\":1}"),
                ("b/y.json", "{\"y\":2}"),
                ("LICENSE", "MIT"),
            ],
        );

        let summary = run(&Extractor::new("v1"), &zip, &out).await;

        assert_eq!(std::fs::read(out.join("a/x/v1.json")).unwrap(), b"{\"x\":1}");
        assert_eq!(std::fs::read(out.join("b/y/v1.json")).unwrap(), b"{\"y\":2}");
        assert_eq!(std::fs::read(out.join("LICENSE/v1")).unwrap(), b"MIT");
        assert_eq!(summary.files, 3);
        assert_eq!(summary.extracted, 3);
        assert!(summary.is_complete());
        assert_eq!(
            summary.to_string(),
            format!("All files extracted to {}", out.display())
        );
    }

    #[tokio::test]
    async fn many_entries_extract_without_interleaving() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("many.zip");
        let out = dir.path().join("out");

        let contents: Vec<(String, String)> = (0..200)
            .map(|i| {
                let body = format!("entry {i} ").repeat(100 + i);
                (format!("assets/file{i}.txt"), body)
            })
            .collect();
        let files: Vec<(&str, &str)> = contents
            .iter()
            .map(|(n, d)| (n.as_str(), d.as_str()))
            .collect();
        write_zip(&zip, &files);

        for extractor in [Extractor::new("t"), Extractor::new("t").with_max_jobs(4)] {
            let summary = run(&extractor, &zip, &out).await;
            assert_eq!(summary.extracted, 200);
            for (i, (_, body)) in contents.iter().enumerate() {
                let path = out.join(format!("assets/file{i}/t.txt"));
                assert_eq!(std::fs::read(path).unwrap(), body.as_bytes());
            }
        }
    }

    #[tokio::test]
    async fn collisions_keep_the_first_entry() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("dup.zip");
        let out = dir.path().join("out");
        write_zip(
            &zip,
            &[
                ("a/x.png", "first"),
                ("a/./x.png", "second"),
                ("a/x.json", "other extension"),
            ],
        );

        let summary = run(&Extractor::new("v1"), &zip, &out).await;

        assert_eq!(std::fs::read(out.join("a/x/v1.png")).unwrap(), b"first");
        assert_eq!(
            std::fs::read(out.join("a/x/v1.json")).unwrap(),
            b"other extension"
        );
        assert_eq!(summary.extracted, 2);
        assert_eq!(summary.skipped, 1);
        assert!(!summary.is_complete());
        assert!(summary.to_string().starts_with("Extracted 2 of 3 files"));
    }

    #[tokio::test]
    async fn failing_entry_does_not_stop_the_others() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("pack.zip");
        let out = dir.path().join("out");
        write_zip(&zip, &[("a/x.json", "ok"), ("b/y.json", "blocked")]);

        // a regular file where the folder for b/y.json should go
        std::fs::create_dir_all(out.join("b")).unwrap();
        std::fs::write(out.join("b/y"), b"in the way").unwrap();

        let summary = run(&Extractor::new("v1"), &zip, &out).await;

        assert_eq!(std::fs::read(out.join("a/x/v1.json")).unwrap(), b"ok");
        assert_eq!(summary.extracted, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(
            summary.to_string(),
            format!(
                "Extracted 1 of 2 files to {} (1 failed, 0 skipped)",
                out.display()
            )
        );
    }

    #[tokio::test]
    async fn empty_archive_reports_completion() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("empty.zip");
        let out = dir.path().join("out");
        write_zip(&zip, &[("only/", "")]);

        let summary = run(&Extractor::new("v1"), &zip, &out).await;
        assert_eq!(summary.files, 0);
        assert!(summary.is_complete());
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn unopenable_archive_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");

        let missing = dir.path().join("missing.zip");
        let result = Extractor::new("v1")
            .list_and_extract_zip_contents(&missing, &out)
            .await;
        assert!(result.is_err());

        let corrupt = dir.path().join("corrupt.zip");
        std::fs::write(&corrupt, b"this is not a zip file at all, not even close").unwrap();
        let result = Extractor::new("v1")
            .list_and_extract_zip_contents(&corrupt, &out)
            .await;
        assert!(result.is_err());
        assert!(!out.exists());
    }

    /// Offsets of every central directory header in `bytes`.
    fn central_headers(bytes: &[u8]) -> Vec<usize> {
        bytes
            .windows(4)
            .enumerate()
            .filter(|(_, w)| w.starts_with(b"PK\x01\x02"))
            .map(|(i, _)| i)
            .collect()
    }

    #[tokio::test]
    async fn file_blocking_a_folder_is_skipped_every_time() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("blocked.zip");
        write_zip(&zip, &[("a/x", "plain file"), ("a/x/v1/y.txt", "nested")]);

        for round in 0..20 {
            let out = dir.path().join(format!("out{round}"));
            let summary = run(&Extractor::new("v1"), &zip, &out).await;

            assert_eq!(summary.extracted, 1);
            assert_eq!(summary.skipped, 1);
            assert_eq!(summary.failed, 0);
            assert_eq!(std::fs::read(out.join("a/x/v1")).unwrap(), b"plain file");
        }
    }

    #[tokio::test]
    async fn unreadable_entries_fail_alone() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("mixed.zip");
        let out = dir.path().join("out");
        write_zip(&zip, &[("a.txt", "fine"), ("b.txt", "odd method"), ("c.txt", "locked")]);

        let mut bytes = std::fs::read(&zip).unwrap();
        let headers = central_headers(&bytes);
        assert_eq!(headers.len(), 3);
        bytes[headers[1] + 10..headers[1] + 12].copy_from_slice(&99u16.to_le_bytes());
        bytes[headers[2] + 8] |= 1;
        std::fs::write(&zip, &bytes).unwrap();

        let summary = run(&Extractor::new("v1"), &zip, &out).await;

        assert_eq!(std::fs::read(out.join("a/v1.txt")).unwrap(), b"fine");
        assert_eq!(summary.extracted, 1);
        assert_eq!(summary.failed, 2);
        assert!(!out.join("b/v1.txt").exists());
        assert!(!out.join("c/v1.txt").exists());
    }

    #[tokio::test]
    async fn entry_escaping_the_destination_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("escape.zip");
        let out = dir.path().join("out");
        write_zip(&zip, &[("zz/evil.txt", "gotcha"), ("ok.txt", "fine")]);

        // same length, so every offset in the archive stays valid
        let bytes = std::fs::read(&zip).unwrap();
        let mut patched = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i..].starts_with(b"zz/evil.txt") {
                patched.extend_from_slice(b"../evil.txt");
                i += b"zz/evil.txt".len();
            } else {
                patched.push(bytes[i]);
                i += 1;
            }
        }
        std::fs::write(&zip, &patched).unwrap();

        let summary = run(&Extractor::new("v1"), &zip, &out).await;

        assert_eq!(summary.files, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.extracted, 1);
        assert_eq!(std::fs::read(out.join("ok/v1.txt")).unwrap(), b"fine");
        assert!(!dir.path().join("evil").exists());
    }

    fn explode() -> Result<()> {
        panic!("decoder blew up")
    }

    #[tokio::test]
    async fn panicking_task_counts_as_failed() {
        let progress = Progress::hidden(2);
        let mut tasks = JoinSet::new();
        tasks.spawn(async { anyhow::Ok(()) });
        tasks.spawn(async { explode() });

        join_all(&mut tasks, &progress).await;

        assert_eq!(progress.failed(), 1);
        assert_eq!(progress.extracted(), 0);
    }
}
