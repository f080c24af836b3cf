use crate::RuntimeError;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

/// Acting identity for repository calls: who, in which project, below which
/// path root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityContext {
    pub user: String,
    pub project: String,
    pub site_root: String,
}

impl Default for IdentityContext {
    fn default() -> Self {
        Self {
            user: "Guest".to_owned(),
            project: "Online".to_owned(),
            site_root: "/".to_owned(),
        }
    }
}

impl IdentityContext {
    pub fn set_site_root(&mut self, root: impl Into<String>) {
        self.site_root = root.into();
    }
}

/// Opaque project handle returned by `ContentRepository::read_project`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ProjectId {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportParameters {
    pub source: PathBuf,
    pub target: String,
    pub overwrite: bool,
}

/// Receives progress lines while an import runs.
pub trait ReportSink {
    fn line(&mut self, message: &str);
}

/// Forwards import progress to `tracing`.
#[derive(Debug, Default)]
pub struct LogReport {
    lines: usize,
}

impl LogReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> usize {
        self.lines
    }
}

impl ReportSink for LogReport {
    fn line(&mut self, message: &str) {
        self.lines += 1;
        info!("import: {message}");
    }
}

pub trait ContentRepository: Send + Sync {
    /// Log `user` in, replacing the identity's user on success.
    fn authenticate(
        &self,
        ctx: &mut IdentityContext,
        user: &str,
        password: &str,
    ) -> Result<(), RuntimeError>;

    fn read_project(&self, name: &str) -> Result<ProjectId, RuntimeError>;

    fn select_project(
        &self,
        ctx: &mut IdentityContext,
        project: &ProjectId,
    ) -> Result<(), RuntimeError>;

    /// Release every lock held in `project`.
    fn unlock_project(&self, ctx: &IdentityContext, project: &ProjectId) -> Result<(), RuntimeError>;

    fn import_data(
        &self,
        ctx: &IdentityContext,
        report: &mut dyn ReportSink,
        params: &ImportParameters,
    ) -> Result<(), RuntimeError>;

    /// Block until no publish job is running.
    fn wait_while_publishing(&self) -> Result<(), RuntimeError>;
}
