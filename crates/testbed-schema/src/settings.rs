use crate::profile::Dialect;
use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Run settings read from `testbed.toml`.
///
/// Relative paths are resolved against the directory that contains the
/// settings file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TestSettings {
    /// Pristine test data; copied, never modified.
    pub data_path: PathBuf,
    /// Disposable working copy of `data_path`. Defaults to `<data_path>.tmp`.
    #[serde(default)]
    pub data_path_tmp: Option<PathBuf>,
    /// Folder holding the setup scripts.
    pub scripts_path: PathBuf,
    #[serde(default)]
    pub dialect: Dialect,
    /// Properties file name inside the working tree's `config/` folder.
    #[serde(default = "default_properties_file")]
    pub properties_file: String,
    /// Name of the optional extra connection profile.
    #[serde(default = "default_additional_profile")]
    pub additional_profile: String,
    /// Pause between session shutdown and dropping the backing store, so
    /// background completion threads can drain.
    #[serde(default = "default_teardown_grace_ms")]
    pub teardown_grace_ms: u64,
    /// Folder below the working copy's `work/` directory holding module
    /// archives that tests import on demand.
    #[serde(default = "default_modules_folder")]
    pub modules_folder: PathBuf,
    #[serde(default)]
    pub import: ImportSettings,
    #[serde(default)]
    pub identity: IdentitySettings,
    #[serde(default)]
    pub scripts: ScriptNames,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ImportSettings {
    /// Module archives imported in order. Takes precedence over `folders`.
    #[serde(default)]
    pub modules: Vec<PathBuf>,
    /// Folders whose files (non-recursive) are imported.
    #[serde(default)]
    pub folders: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct IdentitySettings {
    pub admin_user: String,
    pub admin_password: String,
    pub bootstrap_project: String,
    pub reimport_project: String,
    pub default_project: String,
    pub default_site_root: String,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            admin_user: "Admin".to_owned(),
            admin_password: "admin".to_owned(),
            bootstrap_project: "_setupProject".to_owned(),
            reimport_project: "tempFileProject".to_owned(),
            default_project: "Offline".to_owned(),
            default_site_root: "/sites/default/".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct ScriptNames {
    pub base: String,
    pub default_folders: String,
    pub default_projects: String,
    pub publish: String,
    pub reimport: String,
    pub reimport_publish: String,
}

impl Default for ScriptNames {
    fn default() -> Self {
        Self {
            base: "script_base.txt".to_owned(),
            default_folders: "script_default_folders.txt".to_owned(),
            default_projects: "script_default_projects.txt".to_owned(),
            publish: "script_publish.txt".to_owned(),
            reimport: "script_import.txt".to_owned(),
            reimport_publish: "script_import_publish.txt".to_owned(),
        }
    }
}

fn default_properties_file() -> String {
    "testbed.properties".to_owned()
}

fn default_additional_profile() -> String {
    "additional".to_owned()
}

fn default_teardown_grace_ms() -> u64 {
    500
}

fn default_modules_folder() -> PathBuf {
    PathBuf::from("packages/modules")
}

impl TestSettings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let base = path.parent().unwrap_or(Path::new("."));
        Self::parse_str(&content, base)
    }

    pub fn parse_str(input: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let mut settings: Self = toml::from_str(input)?;
        settings.resolve_paths(base_dir);
        Ok(settings)
    }

    /// Settings with defaults for everything except the three paths.
    pub fn new(
        data_path: impl Into<PathBuf>,
        data_path_tmp: impl Into<PathBuf>,
        scripts_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            data_path: data_path.into(),
            data_path_tmp: Some(data_path_tmp.into()),
            scripts_path: scripts_path.into(),
            dialect: Dialect::default(),
            properties_file: default_properties_file(),
            additional_profile: default_additional_profile(),
            teardown_grace_ms: default_teardown_grace_ms(),
            modules_folder: default_modules_folder(),
            import: ImportSettings::default(),
            identity: IdentitySettings::default(),
            scripts: ScriptNames::default(),
        }
    }

    pub fn tmp_path(&self) -> PathBuf {
        self.data_path_tmp.clone().unwrap_or_else(|| {
            let mut name = self.data_path.as_os_str().to_owned();
            name.push(".tmp");
            PathBuf::from(name)
        })
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }

    pub fn script_path(&self, name: &str) -> PathBuf {
        self.scripts_path.join(name)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let abs = |p: &mut PathBuf| {
            if p.is_relative() && !p.as_os_str().is_empty() {
                *p = base.join(&*p);
            }
        };
        abs(&mut self.data_path);
        if let Some(tmp) = self.data_path_tmp.as_mut() {
            abs(tmp);
        }
        abs(&mut self.scripts_path);
        for entry in self.import.modules.iter_mut().chain(self.import.folders.iter_mut()) {
            let trimmed = entry.to_string_lossy().trim().to_owned();
            *entry = PathBuf::from(trimmed);
            abs(entry);
        }
    }
}
