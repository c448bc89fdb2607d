//! Concurrent physical copy of the final file set

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use indexmap::IndexSet;
use log::{error, trace, warn};
use rayon::prelude::*;

/// One file to mirror into the output tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyJob {
    pub source: PathBuf,
    pub target: PathBuf,
}

#[derive(Debug)]
pub struct CopyFailure {
    pub source: PathBuf,
    pub error: io::Error,
}

impl std::fmt::Display for CopyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.source.display(), self.error)
    }
}

/// Outcome of a copy pass; failures never stop the remaining copies
#[derive(Debug, Default)]
pub struct CopyReport {
    pub copied: usize,
    pub failures: Vec<CopyFailure>,
}

impl CopyReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Map every source file below `source_root` to its mirror below `target_root`
pub fn plan_copy<'a>(
    source_root: &Path,
    target_root: &Path,
    files: impl IntoIterator<Item = &'a PathBuf>,
) -> Vec<CopyJob> {
    let mut seen = IndexSet::new();
    files
        .into_iter()
        .filter(|file| seen.insert((*file).clone()))
        .filter_map(|file| match file.strip_prefix(source_root) {
            Ok(relative) => Some(CopyJob {
                source: file.clone(),
                target: target_root.join(relative),
            }),
            Err(_) => {
                warn!("{} lies outside the source directory, not copied", file.display());
                None
            }
        })
        .collect()
}

/// Copy every job in parallel; each job writes a distinct target
pub fn copy_files(jobs: &[CopyJob]) -> CopyReport {
    let failures: Vec<CopyFailure> = jobs
        .par_iter()
        .filter_map(|job| match copy_one(job) {
            Ok(()) => None,
            Err(error) => {
                error!(
                    "Failed to copy {} to {}: {error}",
                    job.source.display(),
                    job.target.display()
                );
                Some(CopyFailure {
                    source: job.source.clone(),
                    error,
                })
            }
        })
        .collect();

    CopyReport {
        copied: jobs.len() - failures.len(),
        failures,
    }
}

fn copy_one(job: &CopyJob) -> io::Result<()> {
    if let Some(parent) = job.target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(&job.source, &job.target)?;
    trace!("Copied {}", job.target.display());
    Ok(())
}
