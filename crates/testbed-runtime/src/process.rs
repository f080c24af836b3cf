use crate::shell::{CommandShell, SessionSpec, ShellBackend};
use crate::RuntimeError;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use tracing::{debug, info};

/// Drives an external interpreter, one process per script.
///
/// The script is fed to the program's stdin and the call blocks until the
/// program exits. Its stdout is forwarded line by line to the log; a
/// non-zero exit status fails the script with the collected stderr. The
/// session's working directory, id and prompt are handed over as the
/// process's current directory and `TESTBED_SESSION`/`TESTBED_PROMPT`.
pub struct ProcessShellBackend {
    program: String,
    args: Vec<String>,
}

impl ProcessShellBackend {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn resolve_program(&self) -> Option<PathBuf> {
        let candidate = Path::new(&self.program);
        if candidate.components().count() > 1 {
            return candidate.is_file().then(|| candidate.to_path_buf());
        }
        let path = std::env::var_os("PATH")?;
        std::env::split_paths(&path)
            .map(|dir| dir.join(&self.program))
            .find(|p| p.is_file())
    }
}

impl ShellBackend for ProcessShellBackend {
    fn name(&self) -> &'static str {
        "process"
    }

    fn available(&self) -> bool {
        self.resolve_program().is_some()
    }

    fn open(&self, spec: &SessionSpec) -> Result<Box<dyn CommandShell>, RuntimeError> {
        if !self.available() {
            return Err(RuntimeError::BackendUnavailable(self.program.clone()));
        }
        debug!(
            "opening process session {} ({}) in {}",
            spec.session_id,
            self.program,
            spec.work_dir.display()
        );
        Ok(Box::new(ProcessShell {
            program: self.program.clone(),
            args: self.args.clone(),
            spec: spec.clone(),
            closed: false,
        }))
    }
}

struct ProcessShell {
    program: String,
    args: Vec<String>,
    spec: SessionSpec,
    closed: bool,
}

impl CommandShell for ProcessShell {
    fn execute(&mut self, input: &mut dyn BufRead) -> Result<(), RuntimeError> {
        if self.closed {
            return Err(RuntimeError::SessionClosed(self.spec.session_id));
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.spec.work_dir)
            .env("TESTBED_SESSION", self.spec.session_id.to_string())
            .env("TESTBED_PROMPT", &self.spec.prompt)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Both output pipes are drained off-thread so the child never blocks
        // on a full pipe while we are still feeding its stdin.
        let session_id = self.spec.session_id;
        let stdout = child.stdout.take().map(|out| {
            thread::spawn(move || {
                for line in BufReader::new(out).lines().map_while(Result::ok) {
                    info!("[session {session_id}] {line}");
                }
            })
        });
        let stderr = child.stderr.take().map(|mut err| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                if let Err(e) = err.read_to_end(&mut buf) {
                    debug!("[session {session_id}] stderr read failed: {e}");
                }
                buf
            })
        });

        let fed = match child.stdin.take() {
            Some(mut stdin) => io::copy(input, &mut stdin).and_then(|_| stdin.flush()),
            None => Ok(()),
        };
        let status = child.wait()?;
        if let Some(handle) = stdout {
            if handle.join().is_err() {
                debug!("[session {session_id}] stdout forwarder panicked");
            }
        }
        let stderr = stderr
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        match fed {
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!("[session {session_id}] program stopped reading its script early");
            }
            Err(e) => return Err(e.into()),
            Ok(()) => {}
        }

        if status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&stderr);
            Err(RuntimeError::ScriptFailed(format!(
                "{} exited with {status}: {}",
                self.program,
                stderr.trim()
            )))
        }
    }

    fn print_prompt(&mut self) -> Result<(), RuntimeError> {
        let mut out = io::stderr().lock();
        write!(out, "{} ", self.spec.prompt)?;
        out.flush()?;
        Ok(())
    }

    fn exit(&mut self) -> Result<(), RuntimeError> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Cursor;

    fn sh() -> ProcessShellBackend {
        ProcessShellBackend::new("sh", vec!["-s".to_owned()])
    }

    #[test]
    fn missing_program_is_unavailable() {
        let backend = ProcessShellBackend::new("testbed-no-such-program", Vec::new());
        assert!(!backend.available());
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            backend.open(&SessionSpec::new(1, dir.path())),
            Err(RuntimeError::BackendUnavailable(_))
        ));
    }

    #[test]
    fn script_runs_in_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = sh().open(&SessionSpec::new(7, dir.path())).unwrap();
        let mut script = Cursor::new("echo \"$TESTBED_SESSION\" > session.txt\n");
        shell.execute(&mut script).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("session.txt")).unwrap().trim(),
            "7"
        );
    }

    #[test]
    fn non_zero_exit_fails_script() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = sh().open(&SessionSpec::new(1, dir.path())).unwrap();
        let err = shell
            .execute(&mut Cursor::new("echo broken >&2\nexit 3\n"))
            .unwrap_err();
        match err {
            RuntimeError::ScriptFailed(msg) => assert!(msg.contains("broken")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn closed_session_rejects_scripts() {
        let dir = tempfile::tempdir().unwrap();
        let mut shell = sh().open(&SessionSpec::new(2, dir.path())).unwrap();
        shell.exit().unwrap();
        assert!(matches!(
            shell.execute(&mut Cursor::new("true\n")),
            Err(RuntimeError::SessionClosed(2))
        ));
    }

    fn execute_within(
        backend: ProcessShellBackend,
        script: String,
    ) -> Result<(), RuntimeError> {
        let (tx, rx) = std::sync::mpsc::channel();
        let dir = tempfile::tempdir().unwrap();
        let work_dir = dir.path().to_path_buf();
        thread::spawn(move || {
            let mut shell = backend.open(&SessionSpec::new(3, work_dir)).unwrap();
            let _ = tx.send(shell.execute(&mut Cursor::new(script)));
        });
        rx.recv_timeout(std::time::Duration::from_secs(20))
            .expect("script did not finish")
    }

    #[test]
    fn large_stderr_while_reading_large_script() {
        let backend = ProcessShellBackend::new(
            "sh",
            vec![
                "-c".to_owned(),
                "head -c 200000 /dev/zero >&2; cat >/dev/null".to_owned(),
            ],
        );
        execute_within(backend, "echo x\n".repeat(100_000)).unwrap();
    }

    #[test]
    fn large_stdout_is_drained() {
        let script = "i=0\nwhile [ $i -lt 20000 ]; do echo line $i; i=$((i+1)); done\n";
        execute_within(sh(), script.to_owned()).unwrap();
    }

    #[test]
    fn early_exit_is_reaped_and_reported() {
        let backend =
            ProcessShellBackend::new("sh", vec!["-c".to_owned(), "exit 4".to_owned()]);
        match execute_within(backend, "echo x\n".repeat(100_000)) {
            Err(RuntimeError::ScriptFailed(msg)) => assert!(msg.contains('4'), "{msg}"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
