//! Source discovery: turns the paths given on the command line into the
//! ordered set of files to submit.
//!
//! Directories are expanded with `ignore::WalkBuilder`, which keeps its own
//! work stack instead of recursing, so deep trees are fine. Only the hidden
//! rule filters the walk: any entry whose name starts with `.` is dropped
//! when its parent is enumerated, so hidden directories are never entered.
//! Ignore files (`.gitignore` and friends) are deliberately not consulted.
//!
//! Symbolic links are followed. A link that points back at one of its own
//! ancestors is reported by the walker as a loop; the entry is logged and
//! skipped so the walk always terminates. Any other walk error (an
//! unreadable directory, a dangling link) ends the scan with
//! [`ClientError::Walk`].
use ignore::WalkBuilder;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, trace, warn};

use crate::errors::{ClientError, ClientResult};

/// Extensions accepted by the checking service
const SOURCE_EXTENSIONS: &[&str] = &["c", "h"];

/// Display text used for explicitly supplied paths that cannot be checked
pub const INVALID_FILE_WARNING: &str = "Warning: Not a valid file";

/// Result of a scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Eligible files, in traversal order, without duplicates
    pub files: Vec<PathBuf>,
    /// Explicitly supplied paths that failed the validity predicate
    pub rejected: Vec<PathBuf>,
}

/// Walks input paths relative to a fixed working directory
#[derive(Debug, Clone)]
pub struct FileScanner {
    cwd: PathBuf,
}

/// Checks if a file name ends in one of the source extensions
pub fn has_source_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
}

/// Validity predicate: an existing regular file with a `.c` or `.h` name
pub fn is_valid_source(path: &Path) -> bool {
    path.is_file() && has_source_extension(path)
}

/// Looks through the path and depth wrappers for a symlink loop
fn is_loop(err: &ignore::Error) -> bool {
    match err {
        ignore::Error::Loop { .. } => true,
        ignore::Error::WithPath { err, .. }
        | ignore::Error::WithDepth { err, .. }
        | ignore::Error::WithLineNumber { err, .. } => is_loop(err),
        ignore::Error::Partial(errs) => errs.iter().any(is_loop),
        _ => false,
    }
}

impl FileScanner {
    /// Creates a scanner rooted at the process working directory
    pub fn new() -> ClientResult<Self> {
        Ok(Self::with_cwd(std::env::current_dir()?))
    }

    pub fn with_cwd(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }

    /// Scans `paths`; an empty slice scans the working directory
    pub fn scan<P: AsRef<Path>>(&self, paths: &[P]) -> ClientResult<ScanOutcome> {
        let roots: Vec<PathBuf> = if paths.is_empty() {
            vec![self.cwd.clone()]
        } else {
            paths.iter().map(|p| self.absolutize(p.as_ref())).collect()
        };

        let mut outcome = ScanOutcome::default();
        let mut seen = HashSet::new();

        for root in roots {
            if root.is_dir() {
                self.walk_dir(&root, &mut outcome.files, &mut seen)?;
            } else if is_valid_source(&root) {
                if seen.insert(root.clone()) {
                    outcome.files.push(root);
                }
            } else {
                debug!("Rejecting invalid input path: {}", root.display());
                outcome.rejected.push(root);
            }
        }

        debug!(
            "Scan found {} files, rejected {} paths",
            outcome.files.len(),
            outcome.rejected.len()
        );
        Ok(outcome)
    }

    fn walk_dir(
        &self,
        root: &Path,
        files: &mut Vec<PathBuf>,
        seen: &mut HashSet<PathBuf>,
    ) -> ClientResult<()> {
        trace!("Walking directory: {}", root.display());

        let mut builder = WalkBuilder::new(root);
        builder
            .standard_filters(false)
            .hidden(true)
            .follow_links(true)
            .sort_by_file_name(|a, b| a.cmp(b));

        for entry in builder.build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if is_loop(&err) => {
                    warn!("Skipping symlink loop under {}: {}", root.display(), err);
                    continue;
                }
                Err(err) => return Err(ClientError::Walk(err)),
            };

            let is_file = entry.file_type().is_some_and(|ft| ft.is_file());
            if is_file && has_source_extension(entry.path()) {
                let path = entry.into_path();
                if seen.insert(path.clone()) {
                    files.push(path);
                }
            }
        }
        Ok(())
    }

    /// Joins relative paths onto the working directory and drops `.` components
    fn absolutize(&self, path: &Path) -> PathBuf {
        self.cwd
            .join(path)
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect()
    }
}
