use crate::layout::WorkspaceLayout;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Removes generated artifacts from a working copy.
///
/// Purging is best-effort: a failing removal is recorded in the report and
/// the purge moves on to the next path.
pub struct Purger {
    layout: WorkspaceLayout,
}

#[derive(Debug, Default, Serialize)]
pub struct PurgeReport {
    pub removed: Vec<String>,
    pub retained: Vec<String>,
    pub failures: Vec<String>,
    pub root_removed: bool,
}

impl PurgeReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl Purger {
    pub fn new(layout: WorkspaceLayout) -> Self {
        Self { layout }
    }

    /// Purge generated directories, then every top-level entry of the root
    /// other than the working tree, then the root itself when nothing had to
    /// be retained.
    pub fn purge(&self, keep_search_index: bool, dry_run: bool) -> PurgeReport {
        let mut report = PurgeReport::default();
        let root = self.layout.root();
        if !root.exists() {
            debug!("nothing to purge at {}", root.display());
            return report;
        }

        for dir in self.layout.generated_dirs(keep_search_index) {
            if dir.exists() {
                self.remove(&dir, dry_run, &mut report);
            }
        }

        let index = self.layout.index_dir();
        if keep_search_index && index.exists() {
            report.retained.push(index.display().to_string());
        }

        let work = self.layout.work_dir();
        match fs::read_dir(root) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path != work {
                        self.remove(&path, dry_run, &mut report);
                    }
                }
            }
            Err(e) => report
                .failures
                .push(format!("{}: {e}", root.display())),
        }

        if report.retained.is_empty() && report.failures.is_empty() {
            if dry_run {
                report.root_removed = true;
            } else {
                match fs::remove_dir_all(root) {
                    Ok(()) => report.root_removed = true,
                    Err(e) => report.failures.push(format!("{}: {e}", root.display())),
                }
            }
        }

        report
    }

    fn remove(&self, path: &Path, dry_run: bool, report: &mut PurgeReport) {
        debug!("purging {}", path.display());
        let result = if dry_run {
            Ok(())
        } else if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        match result {
            Ok(()) => report.removed.push(self.relative(path)),
            Err(e) => {
                warn!("failed to purge {}: {e}", path.display());
                report.failures.push(format!("{}: {e}", path.display()));
            }
        }
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(self.layout.root())
            .unwrap_or(path)
            .display()
            .to_string()
    }
}
