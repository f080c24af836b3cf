use crate::concurrency::InterruptFlag;
use crate::environment::Environment;
use crate::lifecycle::ImportState;
use crate::orchestrator::{ImportOrchestrator, Protocol};
use crate::provision::{ProvisioningResult, ResourceProvisioner};
use crate::session::SessionController;
use crate::CoreError;
use serde::Serialize;
use std::error::Error as _;
use std::fmt;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use testbed_runtime::{
    Connector, ContentRepository, IdentityContext, ImportParameters, LogReport, ShellBackend,
};
use testbed_schema::ConfigError;
use testbed_store::{
    PurgeReport, Purger, ResourceStorage, StorageRegistry, DEFAULT_STORAGE,
};
use thiserror::Error;
use tracing::{error, info, warn};

/// The external systems a coordinator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub shell: Arc<dyn ShellBackend>,
    pub connector: Arc<dyn Connector>,
    pub repository: Arc<dyn ContentRepository>,
}

/// What a test gets back from a successful setup.
#[derive(Debug, Clone, Serialize)]
pub struct TestHandle {
    pub identity: IdentityContext,
    pub trace: Vec<ImportState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "stage", content = "state")]
pub enum SetupStage {
    Provision,
    ConfigOverlay,
    Session,
    Import(ImportState),
    Storage,
    Interrupted,
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupStage::Provision => write!(f, "provision"),
            SetupStage::ConfigOverlay => write!(f, "config overlay"),
            SetupStage::Session => write!(f, "session"),
            SetupStage::Import(state) => write!(f, "import ({state})"),
            SetupStage::Storage => write!(f, "storage"),
            SetupStage::Interrupted => write!(f, "interrupted"),
        }
    }
}

#[derive(Debug, Error)]
#[error("setup failed at {stage}: {cause}")]
pub struct SetupFailure {
    pub stage: SetupStage,
    #[source]
    pub cause: CoreError,
    /// Import states entered before the failure.
    pub trace: Vec<ImportState>,
}

/// Everything that went wrong during teardown. Nothing here is fatal.
#[derive(Debug, Default, Serialize)]
pub struct TeardownReport {
    pub diagnostics: Vec<String>,
    pub deprovisioned: Vec<ProvisioningResult>,
    pub purge: PurgeReport,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Composes provisioning, session control and the import state machine
/// into environment setup and teardown.
pub struct LifecycleCoordinator {
    env: Arc<Environment>,
    collaborators: Collaborators,
    session: SessionController,
    storages: StorageRegistry,
    handle: Option<TestHandle>,
    interrupt: InterruptFlag,
}

impl LifecycleCoordinator {
    pub fn new(env: Arc<Environment>, collaborators: Collaborators) -> Self {
        let session = SessionController::new(Arc::clone(&collaborators.shell));
        Self {
            env,
            collaborators,
            session,
            storages: StorageRegistry::new(),
            handle: None,
            interrupt: InterruptFlag::new(),
        }
    }

    #[must_use]
    pub fn with_interrupt(mut self, interrupt: InterruptFlag) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Provision a fresh backing store, start a session and run the full
    /// import protocol. On success a `default` storage is selected.
    pub fn setup_environment(
        &mut self,
        target: &str,
        config_folder: Option<&Path>,
        publish: bool,
    ) -> Result<TestHandle, SetupFailure> {
        info!("setting up environment (target={target}, publish={publish})");
        self.storages.clear();
        self.handle = None;

        let results = self.provisioner().provision_all(&self.env.db().profiles, true);
        if let Some(cause) = provisioning_failure(&results) {
            return Err(fail(SetupStage::Provision, cause, Vec::new()));
        }
        self.checkpoint()?;

        if let Some(folder) = config_folder {
            let copied = self
                .env
                .layout()
                .overlay_config(folder)
                .map_err(|e| fail(SetupStage::ConfigOverlay, e.into(), Vec::new()))?;
            info!("overlaid {copied} config files from {}", folder.display());
        }
        self.checkpoint()?;

        let work_dir = self.env.layout().work_dir();
        self.session
            .start(&work_dir)
            .map_err(|e| fail(SetupStage::Session, e, Vec::new()))?;
        self.checkpoint()?;

        let handle = self.run_protocol(Protocol::Full { publish }, target)?;
        self.storages.create(DEFAULT_STORAGE);
        self.storages
            .switch_current(DEFAULT_STORAGE)
            .map_err(|e| fail(SetupStage::Storage, e.into(), handle.trace.clone()))?;
        self.handle = Some(handle.clone());
        info!("environment ready as {}@{}", handle.identity.user, handle.identity.project);
        Ok(handle)
    }

    /// Import more data into the already provisioned store, in a fresh
    /// session.
    pub fn import_data(&mut self, target: &str) -> Result<TestHandle, SetupFailure> {
        info!("importing additional data into {target}");
        let work_dir = self.env.layout().work_dir();
        self.session
            .restart(&work_dir)
            .map_err(|e| fail(SetupStage::Session, e, Vec::new()))?;
        let handle = self.run_protocol(Protocol::Incremental, target)?;
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    /// Import one module archive from the working copy's modules folder
    /// into the site root, as the identity setup finished with.
    pub fn import_module(&self, name: &str) -> Result<PathBuf, CoreError> {
        let handle = self.handle.as_ref().ok_or(CoreError::NotReady)?;
        let path = self
            .env
            .layout()
            .work_dir()
            .join(&self.env.settings().modules_folder)
            .join(name);
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.display().to_string()).into());
        }
        info!("importing module {}", path.display());
        let params = ImportParameters {
            source: path.clone(),
            target: "/".to_owned(),
            overwrite: true,
        };
        let mut report = LogReport::new();
        self.collaborators
            .repository
            .import_data(&handle.identity, &mut report, &params)?;
        Ok(path)
    }

    /// Tear everything down. Every failure is collected into the report;
    /// later steps still run.
    pub fn remove_environment(&mut self) -> TeardownReport {
        info!("removing environment");
        let mut report = TeardownReport::default();

        if self.session.is_live() {
            if let Err(e) = self.session.echo("----- Test cases finished -----") {
                report.diagnostics.push(format!("session: {e}"));
            }
        }
        if let Some(diagnostic) = self.session.terminate() {
            report.diagnostics.push(diagnostic);
        }

        let grace = self.env.settings().teardown_grace();
        if !grace.is_zero() {
            std::thread::sleep(grace);
        }

        self.storages.clear();
        self.handle = None;

        report.deprovisioned = self
            .provisioner()
            .deprovision_all(&self.env.db().profiles, false);
        for result in report.deprovisioned.iter().filter(|r| !r.success) {
            report.diagnostics.push(format!(
                "deprovision '{}': {}",
                result.profile,
                result.errors.join("; ")
            ));
        }

        report.purge = Purger::new(self.env.layout().clone()).purge(self.env.db().keep_search_index, false);
        report
            .diagnostics
            .extend(report.purge.failures.iter().map(|f| format!("purge: {f}")));

        for diagnostic in &report.diagnostics {
            warn!("teardown: {diagnostic}");
        }
        report
    }

    pub fn create_storage(&mut self, name: &str) -> &mut ResourceStorage {
        self.storages.create(name)
    }

    pub fn switch_storage(&mut self, name: &str) -> Result<(), CoreError> {
        Ok(self.storages.switch_current(name)?)
    }

    /// Write storage `name` below the working copy's snapshot folder.
    pub fn persist_storage(&self, name: &str) -> Result<PathBuf, CoreError> {
        let storage = self
            .storages
            .get(name)
            .ok_or_else(|| testbed_store::StoreError::StorageNotFound(name.to_owned()))?;
        let path = self.storage_file(name);
        storage.write_to(&path)?;
        Ok(path)
    }

    /// Load a storage written by `persist_storage`, replacing any in-memory
    /// storage of the same name.
    pub fn restore_storage(&mut self, name: &str) -> Result<(), CoreError> {
        let storage = ResourceStorage::read_from(&self.storage_file(name))?;
        self.storages.insert(storage);
        Ok(())
    }

    pub fn storages(&self) -> &StorageRegistry {
        &self.storages
    }

    pub fn storages_mut(&mut self) -> &mut StorageRegistry {
        &mut self.storages
    }

    pub fn handle(&self) -> Option<&TestHandle> {
        self.handle.as_ref()
    }

    pub fn restart_session(&mut self) -> Result<(), CoreError> {
        let work_dir = self.env.layout().work_dir();
        self.session.restart(&work_dir)?;
        Ok(())
    }

    pub fn echo(&mut self, message: &str) -> Result<(), CoreError> {
        self.session.echo(message)
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.env
    }

    pub fn session(&self) -> &SessionController {
        &self.session
    }

    fn provisioner(&self) -> ResourceProvisioner {
        let db = self.env.db();
        ResourceProvisioner::new(
            Arc::clone(&self.collaborators.connector),
            db.dialect,
            db.tablespaces.clone(),
        )
    }

    fn run_protocol(&mut self, protocol: Protocol, target: &str) -> Result<TestHandle, SetupFailure> {
        let env = Arc::clone(&self.env);
        let mut orchestrator = ImportOrchestrator::new(
            &mut self.session,
            self.collaborators.repository.as_ref(),
            env.settings(),
        );
        match orchestrator.run(protocol, target) {
            Ok(()) => {
                let (identity, trace) = orchestrator.finish();
                Ok(TestHandle { identity, trace })
            }
            Err(e) => {
                let trace = orchestrator.trace().to_vec();
                Err(fail(SetupStage::Import(e.state), e.source, trace))
            }
        }
    }

    fn checkpoint(&self) -> Result<(), SetupFailure> {
        if self.interrupt.is_requested() {
            return Err(fail(SetupStage::Interrupted, CoreError::Interrupted, Vec::new()));
        }
        Ok(())
    }

    fn storage_file(&self, name: &str) -> PathBuf {
        self.env.layout().snapshots_dir().join(format!("{name}.json"))
    }
}

fn provisioning_failure(results: &[ProvisioningResult]) -> Option<CoreError> {
    let mut first = None;
    for result in results.iter().filter(|r| !r.success) {
        for e in &result.errors {
            error!("provisioning '{}': {e}", result.profile);
        }
        first.get_or_insert_with(|| CoreError::Provisioning {
            profile: result.profile.clone(),
            message: result
                .errors
                .first()
                .cloned()
                .unwrap_or_else(|| "unknown error".to_owned()),
        });
    }
    first
}

fn fail(stage: SetupStage, cause: CoreError, trace: Vec<ImportState>) -> SetupFailure {
    let mut chain = cause.to_string();
    let mut source = cause.source();
    while let Some(e) = source {
        let _ = write!(chain, ": {e}");
        source = e.source();
    }
    error!("setup failed at {stage}: {chain}");
    SetupFailure {
        stage,
        cause,
        trace,
    }
}
