use crate::StoreError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const WORK_DIR: &str = "work";

/// Directory layout of the disposable working copy of the test data.
///
/// ```text
/// <root>/
///   work/            session working directory
///     config/        properties file, special config overlays
///       backup/      generated by the repository on config writes
///     classes/
///     lib/
///     logs/publish/
///     index/         search index (optionally kept across teardown)
///   export/
///   snapshots/       persisted resource storages
/// ```
///
/// Everything except `work/` is generated during a run.
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn work_dir(&self) -> PathBuf {
        self.root.join(WORK_DIR)
    }

    #[inline]
    pub fn config_dir(&self) -> PathBuf {
        self.work_dir().join("config")
    }

    #[inline]
    pub fn backup_dir(&self) -> PathBuf {
        self.config_dir().join("backup")
    }

    #[inline]
    pub fn classes_dir(&self) -> PathBuf {
        self.work_dir().join("classes")
    }

    #[inline]
    pub fn lib_dir(&self) -> PathBuf {
        self.work_dir().join("lib")
    }

    #[inline]
    pub fn publish_logs_dir(&self) -> PathBuf {
        self.work_dir().join("logs").join("publish")
    }

    #[inline]
    pub fn index_dir(&self) -> PathBuf {
        self.work_dir().join("index")
    }

    #[inline]
    pub fn export_dir(&self) -> PathBuf {
        self.root.join("export")
    }

    #[inline]
    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    #[inline]
    pub fn properties_file(&self, name: &str) -> PathBuf {
        self.config_dir().join(name)
    }

    /// Lock file guarding the working copy. Lives beside the root so that
    /// purging the root never removes a held lock.
    pub fn lock_file(&self) -> PathBuf {
        let name = self
            .root
            .file_name()
            .map_or_else(|| "testbed".into(), |n| n.to_string_lossy().into_owned());
        self.root
            .parent()
            .unwrap_or(Path::new("."))
            .join(format!(".{name}.lock"))
    }

    /// Directories purged on teardown, in purge order. The search index is
    /// listed only when it is not being kept.
    pub fn generated_dirs(&self, keep_search_index: bool) -> Vec<PathBuf> {
        let mut dirs = vec![
            self.classes_dir(),
            self.publish_logs_dir(),
            self.lib_dir(),
            self.backup_dir(),
        ];
        if !keep_search_index {
            dirs.push(self.index_dir());
        }
        dirs.push(self.export_dir());
        dirs
    }

    /// Copy `source` into the working copy, creating the root if needed.
    /// Existing files are overwritten. Returns the number of files copied.
    pub fn materialize_from(&self, source: &Path) -> Result<u64, StoreError> {
        fs::create_dir_all(&self.root)?;
        let copied = copy_tree(source, &self.root)?;
        debug!(
            "materialized {copied} files from {} into {}",
            source.display(),
            self.root.display()
        );
        Ok(copied)
    }

    /// Copy the regular files of `folder` (non-recursive) into `config/`.
    pub fn overlay_config(&self, folder: &Path) -> Result<u64, StoreError> {
        let dest = self.config_dir();
        fs::create_dir_all(&dest)?;
        let mut copied = 0;
        for entry in fs::read_dir(folder)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::copy(entry.path(), dest.join(entry.file_name()))?;
                copied += 1;
            }
        }
        Ok(copied)
    }
}

fn copy_tree(src: &Path, dst: &Path) -> Result<u64, StoreError> {
    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        let ft = entry.file_type()?;
        if ft.is_dir() {
            fs::create_dir_all(&target)?;
            copied += copy_tree(&entry.path(), &target)?;
        } else if ft.is_file() {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_correct() {
        let layout = WorkspaceLayout::new("/tmp/run/data.tmp");
        assert_eq!(layout.work_dir(), PathBuf::from("/tmp/run/data.tmp/work"));
        assert_eq!(
            layout.backup_dir(),
            PathBuf::from("/tmp/run/data.tmp/work/config/backup")
        );
        assert_eq!(
            layout.publish_logs_dir(),
            PathBuf::from("/tmp/run/data.tmp/work/logs/publish")
        );
        assert_eq!(layout.export_dir(), PathBuf::from("/tmp/run/data.tmp/export"));
        assert_eq!(
            layout.properties_file("testbed.properties"),
            PathBuf::from("/tmp/run/data.tmp/work/config/testbed.properties")
        );
        assert_eq!(
            layout.lock_file(),
            PathBuf::from("/tmp/run/.data.tmp.lock")
        );
    }

    #[test]
    fn generated_dirs_respect_keep_index() {
        let layout = WorkspaceLayout::new("/r");
        assert!(layout.generated_dirs(false).contains(&layout.index_dir()));
        assert!(!layout.generated_dirs(true).contains(&layout.index_dir()));
        assert_eq!(layout.generated_dirs(false).len(), 6);
    }

    #[test]
    fn materialize_copies_nested_tree() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("work/config")).unwrap();
        fs::write(src.path().join("work/config/testbed.properties"), "a=1").unwrap();
        fs::write(src.path().join("readme.txt"), "hi").unwrap();

        let dst = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dst.path().join("copy"));
        let copied = layout.materialize_from(src.path()).unwrap();

        assert_eq!(copied, 2);
        assert_eq!(
            fs::read_to_string(layout.properties_file("testbed.properties")).unwrap(),
            "a=1"
        );
        assert!(layout.root().join("readme.txt").is_file());
    }

    #[test]
    fn materialize_is_repeatable() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("f"), "1").unwrap();
        let dst = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dst.path());
        layout.materialize_from(src.path()).unwrap();
        fs::write(src.path().join("f"), "2").unwrap();
        layout.materialize_from(src.path()).unwrap();
        assert_eq!(fs::read_to_string(dst.path().join("f")).unwrap(), "2");
    }

    #[test]
    fn overlay_config_copies_files_only() {
        let special = tempfile::tempdir().unwrap();
        fs::write(special.path().join("extra.xml"), "<x/>").unwrap();
        fs::create_dir(special.path().join("nested")).unwrap();

        let dst = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dst.path());
        assert_eq!(layout.overlay_config(special.path()).unwrap(), 1);
        assert!(layout.config_dir().join("extra.xml").is_file());
        assert!(!layout.config_dir().join("nested").exists());
    }
}
