use crate::lifecycle::{validate_transition, ImportState};
use crate::session::SessionController;
use crate::CoreError;
use std::fs;
use std::path::PathBuf;
use testbed_runtime::{ContentRepository, IdentityContext, ImportParameters, LogReport};
use testbed_schema::TestSettings;
use thiserror::Error;
use tracing::{debug, info};

/// Which sequence of states a run walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Fresh repository: base setup, folders, import, projects, then either
    /// publish or unlock.
    Full { publish: bool },
    /// Import into an already set up repository and publish.
    Incremental,
}

impl Protocol {
    pub fn plan(self) -> Vec<ImportState> {
        match self {
            Protocol::Full { publish } => vec![
                ImportState::Base,
                ImportState::DefaultFolders,
                ImportState::ImportData,
                ImportState::DefaultProjects,
                if publish {
                    ImportState::Publish
                } else {
                    ImportState::Unlock
                },
                ImportState::Ready,
            ],
            Protocol::Incremental => vec![
                ImportState::Reimport,
                ImportState::ImportData,
                ImportState::Publish,
                ImportState::Ready,
            ],
        }
    }
}

/// The first failure of a run and the state it happened in.
#[derive(Debug, Error)]
#[error("import failed in state {state}: {source}")]
pub struct StageError {
    pub state: ImportState,
    #[source]
    pub source: CoreError,
}

/// Decides which files an import stage feeds to the repository.
pub struct ImportSources;

impl ImportSources {
    /// Module archives, when any are configured, win outright; each one
    /// counts only if it is a regular file. Otherwise every listed folder
    /// contributes its regular files (non-recursive), sorted by name.
    /// Empty and missing entries are skipped.
    pub fn resolve(modules: &[PathBuf], folders: &[PathBuf]) -> Vec<PathBuf> {
        let entries = |list: &[PathBuf]| -> Vec<PathBuf> {
            list.iter()
                .map(|p| PathBuf::from(p.to_string_lossy().trim()))
                .filter(|p| !p.as_os_str().is_empty())
                .collect()
        };

        let modules = entries(modules);
        if !modules.is_empty() {
            return modules.into_iter().filter(|p| p.is_file()).collect();
        }

        let mut sources = Vec::new();
        for folder in entries(folders).iter().filter(|p| p.is_dir()) {
            let Ok(dir) = fs::read_dir(folder) else {
                debug!("skipping unreadable import folder {}", folder.display());
                continue;
            };
            let mut files: Vec<PathBuf> = dir
                .flatten()
                .map(|entry| entry.path())
                .filter(|p| p.is_file())
                .collect();
            files.sort();
            sources.extend(files);
        }
        sources
    }
}

/// Walks the import state machine against one session and repository.
///
/// The first failing state aborts the run; nothing is rolled back.
pub struct ImportOrchestrator<'a> {
    session: &'a mut SessionController,
    repository: &'a dyn ContentRepository,
    settings: &'a TestSettings,
    identity: IdentityContext,
    trace: Vec<ImportState>,
}

impl<'a> ImportOrchestrator<'a> {
    pub fn new(
        session: &'a mut SessionController,
        repository: &'a dyn ContentRepository,
        settings: &'a TestSettings,
    ) -> Self {
        Self {
            session,
            repository,
            settings,
            identity: IdentityContext::default(),
            trace: Vec::new(),
        }
    }

    pub fn run(&mut self, protocol: Protocol, target: &str) -> Result<(), StageError> {
        let mut previous: Option<ImportState> = None;
        for state in protocol.plan() {
            if let Some(from) = previous {
                validate_transition(from, state).map_err(|source| StageError { state, source })?;
            }
            info!("import state: {state}");
            self.trace.push(state);
            self.enter(state, protocol, target)
                .map_err(|source| StageError { state, source })?;
            previous = Some(state);
        }
        Ok(())
    }

    /// States entered so far, including a failed one.
    pub fn trace(&self) -> &[ImportState] {
        &self.trace
    }

    pub fn identity(&self) -> &IdentityContext {
        &self.identity
    }

    pub fn finish(self) -> (IdentityContext, Vec<ImportState>) {
        (self.identity, self.trace)
    }

    fn enter(&mut self, state: ImportState, protocol: Protocol, target: &str) -> Result<(), CoreError> {
        let settings = self.settings;
        let scripts = &settings.scripts;
        let identity = &settings.identity;
        match state {
            ImportState::Base => self.script(&scripts.base),
            ImportState::DefaultFolders => {
                self.script(&scripts.default_folders)?;
                self.login(&identity.bootstrap_project)
            }
            ImportState::Reimport => {
                self.script(&scripts.reimport)?;
                self.login(&identity.reimport_project)
            }
            ImportState::ImportData => self.import(target),
            ImportState::DefaultProjects => self.script(&scripts.default_projects),
            ImportState::Publish => {
                let script = match protocol {
                    Protocol::Incremental => &scripts.reimport_publish,
                    Protocol::Full { .. } => &scripts.publish,
                };
                self.script(script)?;
                self.repository.wait_while_publishing()?;
                Ok(())
            }
            ImportState::Unlock => {
                let project = self.repository.read_project(&identity.bootstrap_project)?;
                self.repository.unlock_project(&self.identity, &project)?;
                Ok(())
            }
            ImportState::Ready => {
                let project = self.repository.read_project(&identity.default_project)?;
                self.repository.select_project(&mut self.identity, &project)?;
                self.identity.set_site_root(identity.default_site_root.as_str());
                Ok(())
            }
        }
    }

    fn script(&mut self, name: &str) -> Result<(), CoreError> {
        self.session.run_script(&self.settings.script_path(name))
    }

    fn login(&mut self, project: &str) -> Result<(), CoreError> {
        let identity = &self.settings.identity;
        self.repository
            .authenticate(&mut self.identity, &identity.admin_user, &identity.admin_password)?;
        let project = self.repository.read_project(project)?;
        self.repository.select_project(&mut self.identity, &project)?;
        Ok(())
    }

    fn import(&mut self, target: &str) -> Result<(), CoreError> {
        let import = &self.settings.import;
        let sources = ImportSources::resolve(&import.modules, &import.folders);
        info!("importing {} sources into {target}", sources.len());
        let mut report = LogReport::new();
        for source in sources {
            let params = ImportParameters {
                source,
                target: target.to_owned(),
                overwrite: true,
            };
            self.repository.import_data(&self.identity, &mut report, &params)?;
        }
        Ok(())
    }
}
