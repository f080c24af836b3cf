use crate::concurrency::RunLock;
use crate::CoreError;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use testbed_schema::{ConfigError, DbConfig, Properties, TestSettings};
use testbed_store::WorkspaceLayout;
use tracing::{debug, info};

/// Everything a run needs that is computed once: settings, the materialized
/// working copy, the parsed properties, and the resolved connection profiles.
///
/// Holds the working copy's `RunLock` for as long as it lives.
pub struct Environment {
    settings: TestSettings,
    layout: WorkspaceLayout,
    properties: Properties,
    db: DbConfig,
    search_paths: Vec<PathBuf>,
    _lock: RunLock,
}

impl Environment {
    /// Lock and materialize the working copy, then read its properties.
    pub fn load(settings: TestSettings) -> Result<Self, CoreError> {
        if !settings.data_path.is_dir() {
            return Err(ConfigError::DataPathMissing(settings.data_path.display().to_string()).into());
        }

        let layout = WorkspaceLayout::new(settings.tmp_path());
        let lock_path = layout.lock_file();
        let lock = RunLock::try_acquire(&lock_path)?
            .ok_or_else(|| CoreError::Locked(layout.root().display().to_string()))?;

        let copied = layout.materialize_from(&settings.data_path)?;
        info!(
            "materialized {copied} files into {}",
            layout.root().display()
        );

        let properties = Properties::load(&layout.properties_file(&settings.properties_file))?;
        let db = DbConfig::from_properties(&properties, settings.dialect, &settings.additional_profile)?;

        let mut search_paths = vec![layout.root().to_path_buf()];
        for extra in &db.test_data_paths {
            let path = resolve_against(&settings.data_path, extra);
            if !path.is_dir() {
                return Err(ConfigError::DataPathMissing(path.display().to_string()).into());
            }
            if !search_paths.contains(&path) {
                search_paths.push(path);
            }
        }
        debug!("test data search paths: {search_paths:?}");

        Ok(Self {
            settings,
            layout,
            properties,
            db,
            search_paths,
            _lock: lock,
        })
    }

    pub fn settings(&self) -> &TestSettings {
        &self.settings
    }

    pub fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn db(&self) -> &DbConfig {
        &self.db
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// First existing `name` below the search paths, working copy first.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        self.search_paths
            .iter()
            .map(|base| base.join(name))
            .find(|p| p.exists())
    }

    /// Like `resolve`, but a missing file is a configuration error.
    pub fn require(&self, name: &str) -> Result<PathBuf, CoreError> {
        self.resolve(name)
            .ok_or_else(|| ConfigError::NotFound(name.to_owned()).into())
    }
}

fn resolve_against(base: &Path, entry: &str) -> PathBuf {
    let path = Path::new(entry.trim());
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Lazily built, process-wide `Environment`.
///
/// The first `get_or_init` builds the environment while holding the slot's
/// mutex; concurrent callers block and then receive the same `Arc`.
pub struct SharedEnvironment {
    settings: TestSettings,
    slot: Mutex<Option<Arc<Environment>>>,
}

impl SharedEnvironment {
    pub fn new(settings: TestSettings) -> Self {
        Self {
            settings,
            slot: Mutex::new(None),
        }
    }

    pub fn get_or_init(&self) -> Result<Arc<Environment>, CoreError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(env) = slot.as_ref() {
            return Ok(Arc::clone(env));
        }
        let env = Arc::new(Environment::load(self.settings.clone())?);
        *slot = Some(Arc::clone(&env));
        Ok(env)
    }

    /// The environment, if it has been built.
    pub fn get(&self) -> Option<Arc<Environment>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
