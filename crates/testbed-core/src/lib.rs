//! Lifecycle engine for disposable content-repository test environments.
//!
//! This crate ties configuration, on-disk layout and the collaborator
//! interfaces together: `Environment` loads a run's settings once,
//! `ResourceProvisioner` creates and drops the backing store with one forced
//! retry, `SessionController` owns the single live command session,
//! `ImportOrchestrator` walks the import state machine, and
//! `LifecycleCoordinator` composes all of them into setup and teardown.

pub mod concurrency;
pub mod coordinator;
pub mod environment;
pub mod lifecycle;
pub mod orchestrator;
pub mod provision;
pub mod session;

pub use concurrency::{install_interrupt_handler, InterruptFlag, RunLock};
pub use coordinator::{
    Collaborators, LifecycleCoordinator, SetupFailure, SetupStage, TeardownReport, TestHandle,
};
pub use environment::{Environment, SharedEnvironment};
pub use lifecycle::{validate_transition, ImportState};
pub use orchestrator::{ImportOrchestrator, ImportSources, Protocol, StageError};
pub use provision::{ProvisioningResult, ResourceProvisioner};
pub use session::{Session, SessionController};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(#[from] testbed_schema::ConfigError),
    #[error("store error: {0}")]
    Store(#[from] testbed_store::StoreError),
    #[error("runtime error: {0}")]
    Runtime(#[from] testbed_runtime::RuntimeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("provisioning '{profile}' failed: {message}")]
    Provisioning { profile: String, message: String },
    #[error("script {} failed: {source}", .script.display())]
    ScriptExecution {
        script: PathBuf,
        #[source]
        source: testbed_runtime::RuntimeError,
    },
    #[error("no command session is running")]
    SessionNotStarted,
    #[error("environment is not set up")]
    NotReady,
    #[error("interrupted")]
    Interrupted,
    #[error("working copy {0} is in use by another run")]
    Locked(String),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn script_execution_keeps_source() {
        let e = CoreError::ScriptExecution {
            script: PathBuf::from("/scripts/script_base.txt"),
            source: testbed_runtime::RuntimeError::ScriptFailed("exit 1".to_owned()),
        };
        assert!(e.to_string().contains("script_base.txt"));
        assert!(e.source().is_some());
    }

    #[test]
    fn provisioning_names_profile() {
        let e = CoreError::Provisioning {
            profile: "default".to_owned(),
            message: "cannot create".to_owned(),
        };
        assert_eq!(e.to_string(), "provisioning 'default' failed: cannot create");
    }
}
