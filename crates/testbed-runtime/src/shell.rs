use crate::RuntimeError;
use serde::Serialize;
use std::io::BufRead;
use std::path::PathBuf;

/// Prompt template shown by interactive shells. Tokens are resolved by the
/// shell from its own identity context.
pub const DEFAULT_PROMPT: &str = "${user}@${project}>";

/// Everything a backend needs to open one command session.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionSpec {
    pub session_id: u64,
    pub work_dir: PathBuf,
    pub prompt: String,
}

impl SessionSpec {
    pub fn new(session_id: u64, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            session_id,
            work_dir: work_dir.into(),
            prompt: DEFAULT_PROMPT.to_owned(),
        }
    }
}

/// A live scripted command session.
pub trait CommandShell: Send {
    /// Execute every command read from `input`, blocking until the shell has
    /// processed all of it.
    fn execute(&mut self, input: &mut dyn BufRead) -> Result<(), RuntimeError>;

    fn print_prompt(&mut self) -> Result<(), RuntimeError> {
        Ok(())
    }

    /// End the session. Further `execute` calls fail.
    fn exit(&mut self) -> Result<(), RuntimeError>;
}

pub trait ShellBackend: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    fn open(&self, spec: &SessionSpec) -> Result<Box<dyn CommandShell>, RuntimeError>;
}

/// Resolve a backend by name: `mock` or `process:<program> [args...]`.
pub fn select_shell_backend(name: &str) -> Result<Box<dyn ShellBackend>, RuntimeError> {
    match name.split_once(':') {
        Some(("process", command)) => {
            let mut parts = command.split_whitespace();
            let program = parts
                .next()
                .ok_or_else(|| RuntimeError::BackendUnavailable(name.to_owned()))?;
            Ok(Box::new(crate::process::ProcessShellBackend::new(
                program,
                parts.map(str::to_owned).collect(),
            )))
        }
        None if name == "mock" => Ok(Box::new(crate::mock::MockShellBackend::standalone())),
        _ => Err(RuntimeError::BackendUnavailable(name.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_valid_backends() {
        assert_eq!(select_shell_backend("mock").unwrap().name(), "mock");
        assert_eq!(select_shell_backend("process:sh -s").unwrap().name(), "process");
    }

    #[test]
    fn select_invalid_backend_fails() {
        assert!(select_shell_backend("nonexistent").is_err());
        assert!(select_shell_backend("process:").is_err());
        assert!(select_shell_backend("telnet:host").is_err());
    }

    #[test]
    fn session_spec_uses_default_prompt() {
        let spec = SessionSpec::new(3, "/tmp/work");
        assert_eq!(spec.prompt, "${user}@${project}>");
        assert_eq!(spec.session_id, 3);
    }
}
