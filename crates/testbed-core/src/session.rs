use crate::CoreError;
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use testbed_runtime::{CommandShell, RuntimeError, SessionSpec, ShellBackend};
use tracing::{debug, info};

/// One live command session.
pub struct Session {
    id: u64,
    work_dir: PathBuf,
    shell: Box<dyn CommandShell>,
}

impl Session {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }
}

/// Owns at most one live session at a time.
pub struct SessionController {
    backend: Arc<dyn ShellBackend>,
    live: Option<Session>,
    last_id: u64,
}

impl SessionController {
    pub fn new(backend: Arc<dyn ShellBackend>) -> Self {
        Self {
            backend,
            live: None,
            last_id: 0,
        }
    }

    /// Start a fresh session in `work_dir`, terminating the live one first.
    /// Errors from ending the previous session are logged and dropped.
    pub fn start(&mut self, work_dir: &Path) -> Result<&Session, CoreError> {
        if let Some(diagnostic) = self.terminate() {
            debug!("previous session ended with an error: {diagnostic}");
        }

        self.last_id += 1;
        let spec = SessionSpec::new(self.last_id, work_dir);
        let shell = self.backend.open(&spec)?;
        info!(
            "started {} session {} in {}",
            self.backend.name(),
            spec.session_id,
            work_dir.display()
        );
        Ok(self.live.insert(Session {
            id: spec.session_id,
            work_dir: spec.work_dir,
            shell,
        }))
    }

    pub fn restart(&mut self, work_dir: &Path) -> Result<&Session, CoreError> {
        self.start(work_dir)
    }

    /// Stream `script` into the live session and wait for it to finish.
    pub fn run_script(&mut self, script: &Path) -> Result<(), CoreError> {
        let session = self.live.as_mut().ok_or(CoreError::SessionNotStarted)?;
        let failed = |source: RuntimeError| CoreError::ScriptExecution {
            script: script.to_path_buf(),
            source,
        };

        let file = File::open(script).map_err(|e| failed(e.into()))?;
        info!("session {}: running {}", session.id, script.display());
        session
            .shell
            .execute(&mut BufReader::new(file))
            .map_err(failed)
    }

    /// Print `message` through the live session.
    pub fn echo(&mut self, message: &str) -> Result<(), CoreError> {
        let session = self.live.as_mut().ok_or(CoreError::SessionNotStarted)?;
        session.shell.print_prompt()?;
        let mut line = Cursor::new(format!("echo {message}\n"));
        session.shell.execute(&mut line)?;
        Ok(())
    }

    /// End the live session, if any. An exit error is returned as a
    /// diagnostic instead of being raised.
    pub fn terminate(&mut self) -> Option<String> {
        let mut session = self.live.take()?;
        debug!("terminating session {}", session.id);
        session
            .shell
            .exit()
            .err()
            .map(|e| format!("session {}: {e}", session.id))
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    pub fn current(&self) -> Option<&Session> {
        self.live.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use testbed_runtime::mock::MockShellBackend;

    fn controller(backend: &Arc<MockShellBackend>) -> SessionController {
        SessionController::new(Arc::clone(backend) as Arc<dyn ShellBackend>)
    }

    #[test]
    fn start_replaces_live_session() {
        let backend = Arc::new(MockShellBackend::standalone());
        let mut ctl = controller(&backend);
        let dir = tempfile::tempdir().unwrap();

        assert_eq!(ctl.start(dir.path()).unwrap().id(), 1);
        assert_eq!(ctl.start(dir.path()).unwrap().id(), 2);
        assert_eq!(backend.live_sessions(), 1);
        assert_eq!(ctl.current().unwrap().work_dir(), dir.path());
    }

    #[test]
    fn failing_exit_does_not_block_restart() {
        let backend = Arc::new(MockShellBackend::standalone().with_failing_exit());
        let mut ctl = controller(&backend);
        let dir = tempfile::tempdir().unwrap();

        ctl.start(dir.path()).unwrap();
        let session = ctl.restart(dir.path()).unwrap();
        assert_eq!(session.id(), 2);
        assert_eq!(backend.live_sessions(), 1);
    }

    #[test]
    fn terminate_reports_exit_error() {
        let backend = Arc::new(MockShellBackend::standalone().with_failing_exit());
        let mut ctl = controller(&backend);
        let dir = tempfile::tempdir().unwrap();

        assert!(ctl.terminate().is_none());
        ctl.start(dir.path()).unwrap();
        let diagnostic = ctl.terminate().unwrap();
        assert!(diagnostic.contains("session 1"));
        assert!(!ctl.is_live());
    }

    #[test]
    fn run_script_streams_file() {
        let backend = Arc::new(MockShellBackend::standalone());
        let mut ctl = controller(&backend);
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("script_base.txt");
        fs::write(&script, "createProject Offline\necho done\n").unwrap();

        ctl.start(dir.path()).unwrap();
        ctl.run_script(&script).unwrap();
        assert_eq!(backend.commands(), vec!["createProject Offline", "echo done"]);
        assert!(backend.repository().projects().contains(&"Offline".to_owned()));
    }

    #[test]
    fn missing_script_names_path() {
        let backend = Arc::new(MockShellBackend::standalone());
        let mut ctl = controller(&backend);
        let dir = tempfile::tempdir().unwrap();
        ctl.start(dir.path()).unwrap();

        let err = ctl.run_script(&dir.path().join("absent.txt")).unwrap_err();
        match err {
            CoreError::ScriptExecution { script, source } => {
                assert!(script.ends_with("absent.txt"));
                assert!(matches!(source, RuntimeError::Io(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn script_failure_is_not_retried() {
        let backend = Arc::new(MockShellBackend::standalone());
        let mut ctl = controller(&backend);
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("bad.txt");
        fs::write(&script, "fail nope\n").unwrap();
        ctl.start(dir.path()).unwrap();

        assert!(matches!(
            ctl.run_script(&script),
            Err(CoreError::ScriptExecution { .. })
        ));
        assert_eq!(backend.commands().len(), 1);
    }

    #[test]
    fn operations_require_live_session() {
        let backend = Arc::new(MockShellBackend::standalone());
        let mut ctl = controller(&backend);
        assert!(matches!(
            ctl.run_script(Path::new("x")),
            Err(CoreError::SessionNotStarted)
        ));
        assert!(matches!(ctl.echo("hi"), Err(CoreError::SessionNotStarted)));
    }

    #[test]
    fn echo_goes_through_shell() {
        let backend = Arc::new(MockShellBackend::standalone());
        let mut ctl = controller(&backend);
        let dir = tempfile::tempdir().unwrap();
        ctl.start(dir.path()).unwrap();
        ctl.echo("----- Test cases finished -----").unwrap();
        assert_eq!(backend.commands(), vec!["echo ----- Test cases finished -----"]);
    }
}
