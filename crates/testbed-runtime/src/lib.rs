//! Collaborator interfaces for testbed runs.
//!
//! The lifecycle engine never talks to a database, a repository or a command
//! interpreter directly. It goes through the traits defined here:
//! `ShellBackend`/`CommandShell` for the scripted command session,
//! `Connector`/`SetupConnection` for creating and dropping the backing store,
//! and `ContentRepository` for identity, project and import operations.
//! `ProcessShellBackend` drives an external interpreter; the `mock` module
//! provides in-memory implementations of all three seams.

pub mod db;
pub mod mock;
pub mod process;
pub mod repository;
pub mod shell;

pub use db::{ConnectionGuard, Connector, SetupConnection};
pub use process::ProcessShellBackend;
pub use repository::{
    ContentRepository, IdentityContext, ImportParameters, LogReport, ProjectId, ReportSink,
};
pub use shell::{select_shell_backend, CommandShell, SessionSpec, ShellBackend};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend '{0}' is not available on this system")]
    BackendUnavailable(String),
    #[error("could not connect with profile '{profile}': {reason}")]
    ConnectFailed { profile: String, reason: String },
    #[error("statement failed: {0}")]
    StatementFailed(String),
    #[error("script failed: {0}")]
    ScriptFailed(String),
    #[error("session {0} is closed")]
    SessionClosed(u64),
    #[error("repository error: {0}")]
    Repository(String),
}
