//! Where each archive entry lands on disk.
//!
//! An entry `textures/block/stone.png` extracted with tag `v1` under `out`
//! becomes `out/textures/block/stone/v1.png`: the entry name without its
//! extension names a folder, and the file inside it is the tag plus the
//! original extension.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

use crate::zip::ZipFileEntry;

/// Split an entry name into the part before its extension and the extension.
///
/// The extension starts at the last `.` of the final `/`-separated segment and
/// includes the dot; a name whose final segment has no dot has an empty
/// extension. A leading dot counts, so `.gitignore` is all extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    let segment_start = name.rfind('/').map_or(0, |i| i + 1);
    match name[segment_start..].rfind('.') {
        Some(dot) => name.split_at(segment_start + dot),
        None => (name, ""),
    }
}

/// Reject tags that would not stay a single file name.
pub fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() {
        bail!("tag must not be empty");
    }
    if tag.contains(['/', '\\']) || tag == "." || tag == ".." {
        bail!("tag `{tag}` must be a plain file name");
    }
    Ok(())
}

/// Output location of one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    /// Folder named after the entry, created before writing
    pub dir: PathBuf,
    /// `dir` joined with tag + extension
    pub file: PathBuf,
}

/// Compute the output folder and file for an entry name.
///
/// Fails for names that would escape `root`: absolute paths, drive prefixes,
/// backslashes or `..` segments.
pub fn output_paths(root: &Path, entry_name: &str, tag: &str) -> Result<OutputPaths> {
    if entry_name.starts_with('/') || entry_name.contains('\\') {
        bail!("Refusing unsafe entry path {entry_name}");
    }

    let (stem, extension) = split_extension(entry_name);

    let mut dir = root.to_path_buf();
    for (i, segment) in stem.split('/').enumerate() {
        match segment {
            "" | "." => continue,
            ".." => bail!("Refusing unsafe entry path {entry_name}"),
            s if i == 0 && s.contains(':') => bail!("Refusing unsafe entry path {entry_name}"),
            s => dir.push(s),
        }
    }

    let file = dir.join(format!("{tag}{extension}"));
    Ok(OutputPaths { dir, file })
}

/// One unit of work: an entry and where it goes
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub entry: ZipFileEntry,
    pub output: OutputPaths,
}

/// Entry left out because an earlier entry already claims `path`,
/// as its output file or as one of its folders
#[derive(Debug, Clone)]
pub struct Collision {
    pub entry: String,
    pub kept: String,
    pub path: PathBuf,
}

/// Entry whose name cannot be mapped safely under the destination
#[derive(Debug)]
pub struct Rejected {
    pub entry: String,
    pub error: anyhow::Error,
}

/// Every non-directory entry sorted into jobs, collisions and rejections.
#[derive(Debug, Default)]
pub struct ExtractionPlan {
    pub jobs: Vec<ExtractionJob>,
    pub collisions: Vec<Collision>,
    pub rejected: Vec<Rejected>,
}

impl ExtractionPlan {
    /// Number of file entries the plan accounts for.
    pub fn file_count(&self) -> usize {
        self.jobs.len() + self.collisions.len() + self.rejected.len()
    }
}

/// Build the extraction plan for `entries`.
///
/// Entries are claimed in archive order. An entry collides with an earlier one
/// when it maps to the same output file, when its output file sits where an
/// earlier entry needs a folder, or when one of its folders is an earlier
/// entry's output file. The earlier entry wins and the later one becomes a
/// [`Collision`], so the outcome never depends on task scheduling.
pub fn plan(entries: &[ZipFileEntry], root: &Path, tag: &str) -> ExtractionPlan {
    let mut plan = ExtractionPlan::default();
    let mut files: HashMap<PathBuf, usize> = HashMap::new();
    let mut dirs: HashMap<PathBuf, usize> = HashMap::new();

    for entry in entries.iter().filter(|e| !e.is_directory) {
        let output = match output_paths(root, &entry.file_name, tag) {
            Ok(output) => output,
            Err(error) => {
                plan.rejected.push(Rejected {
                    entry: entry.file_name.clone(),
                    error,
                });
                continue;
            }
        };

        let folders: Vec<&Path> = output
            .dir
            .ancestors()
            .take_while(|dir| *dir != root)
            .collect();

        let conflict = files
            .get(&output.file)
            .or_else(|| dirs.get(&output.file))
            .map(|&owner| (owner, output.file.clone()))
            .or_else(|| {
                folders
                    .iter()
                    .find_map(|dir| files.get(*dir).map(|&owner| (owner, dir.to_path_buf())))
            });

        if let Some((owner, path)) = conflict {
            plan.collisions.push(Collision {
                entry: entry.file_name.clone(),
                kept: plan.jobs[owner].entry.file_name.clone(),
                path,
            });
            continue;
        }

        let index = plan.jobs.len();
        for dir in folders {
            dirs.entry(dir.to_path_buf()).or_insert(index);
        }
        files.insert(output.file.clone(), index);
        plan.jobs.push(ExtractionJob {
            entry: entry.clone(),
            output,
        });
    }

    plan
}
