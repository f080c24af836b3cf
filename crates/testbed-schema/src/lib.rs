//! Configuration schema for testbed environments.
//!
//! This crate defines the data layer every other crate builds on: immutable
//! `ConnectionProfile` descriptors, the backing-store `Dialect` and its error
//! tolerance, a Java-style `.properties` parser (`Properties`), the resolved
//! database configuration (`DbConfig`), and the TOML run settings
//! (`TestSettings`) that point at scripts, data folders, and import sources.

pub mod config;
pub mod profile;
pub mod properties;
pub mod settings;
pub mod types;

pub use config::{DbConfig, ProfileSet, Tablespaces, KEY_KEEP_SEARCH_INDEX, KEY_TEST_DATA_PATH};
pub use profile::{ConnectionProfile, Dialect};
pub use properties::Properties;
pub use settings::{IdentitySettings, ImportSettings, ScriptNames, TestSettings};
pub use types::{ContentHash, ProfileName, StorageName};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("invalid properties file {path}, line {line}: {reason}")]
    InvalidProperties {
        path: String,
        line: usize,
        reason: String,
    },
    #[error("missing configuration key: {0}")]
    MissingKey(String),
    #[error("unsupported database dialect: {0}")]
    UnknownDialect(String),
    #[error("test data not available at {0}")]
    DataPathMissing(String),
    #[error("configuration file not found in any test data path: {0}")]
    NotFound(String),
}
