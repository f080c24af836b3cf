use super::{
    colorize_state, json_pretty, spin_fail, spin_ok, spinner, EXIT_SETUP_FAILED, EXIT_SUCCESS,
    EXIT_TEARDOWN_DIRTY,
};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use testbed_core::{
    install_interrupt_handler, Collaborators, ImportState, InterruptFlag, LifecycleCoordinator,
    SetupFailure, SetupStage, SharedEnvironment, TeardownReport, TestHandle,
};
use testbed_runtime::mock::{MockConnector, MockRepository, MockShellBackend};
use testbed_runtime::{select_shell_backend, ContentRepository, ShellBackend};
use testbed_schema::TestSettings;

pub struct RehearseOptions {
    pub publish: bool,
    pub target: String,
    pub config_folder: Option<PathBuf>,
    pub shell: String,
    pub reimport: bool,
    pub fail_script: Option<String>,
    pub flaky_create: u32,
}

#[derive(Serialize)]
struct FailureView {
    stage: SetupStage,
    message: String,
    trace: Vec<ImportState>,
}

impl From<&SetupFailure> for FailureView {
    fn from(failure: &SetupFailure) -> Self {
        Self {
            stage: failure.stage,
            message: failure.cause.to_string(),
            trace: failure.trace.clone(),
        }
    }
}

#[derive(Serialize)]
struct Rehearsal<'a> {
    ok: bool,
    setup: Option<&'a TestHandle>,
    reimport: Option<&'a TestHandle>,
    failure: Option<FailureView>,
    imported: usize,
    teardown: &'a TeardownReport,
}

/// Set up and tear down an environment against the mock database and
/// repository. Teardown runs whether or not setup succeeded.
pub fn run(mut settings: TestSettings, opts: &RehearseOptions, json: bool) -> Result<u8, String> {
    let _injected = match &opts.fail_script {
        Some(name) => Some(inject_failure(&mut settings, name)?),
        None => None,
    };

    let repository = Arc::new(MockRepository::new());
    let shell: Arc<dyn ShellBackend> = if opts.shell == "mock" {
        Arc::new(MockShellBackend::new(Arc::clone(&repository)))
    } else {
        // An external shell cannot reach the in-memory repository, so the
        // project its scripts would create has to exist up front.
        repository.create_project(&settings.identity.default_project);
        Arc::from(select_shell_backend(&opts.shell).map_err(|e| e.to_string())?)
    };
    if !shell.available() {
        return Err(format!("shell backend '{}' is not available", opts.shell));
    }
    let connector = MockConnector::new();
    connector.fail_next_create_database(opts.flaky_create);

    let shared = SharedEnvironment::new(settings);
    let env = shared.get_or_init().map_err(|e| e.to_string())?;

    let interrupt = InterruptFlag::new();
    install_interrupt_handler(&interrupt);

    let content: Arc<dyn ContentRepository> = repository.clone();
    let mut coordinator = LifecycleCoordinator::new(
        env,
        Collaborators {
            shell,
            connector: Arc::new(connector),
            repository: content,
        },
    )
    .with_interrupt(interrupt);

    let pb = (!json).then(|| spinner("setting up environment..."));
    let mut failure = None;
    let mut reimported = None;
    let setup = match coordinator.setup_environment(
        &opts.target,
        opts.config_folder.as_deref(),
        opts.publish,
    ) {
        Ok(handle) => {
            if let Some(pb) = &pb {
                spin_ok(
                    pb,
                    &format!(
                        "environment ready as {}@{}",
                        handle.identity.user, handle.identity.project
                    ),
                );
            }
            Some(handle)
        }
        Err(e) => {
            if let Some(pb) = &pb {
                spin_fail(pb, &e.to_string());
            }
            failure = Some(FailureView::from(&e));
            None
        }
    };

    if setup.is_some() && opts.reimport {
        match coordinator.import_data(&opts.target) {
            Ok(handle) => reimported = Some(handle),
            Err(e) => failure = Some(FailureView::from(&e)),
        }
    }

    let pb = (!json).then(|| spinner("tearing down..."));
    let teardown = coordinator.remove_environment();
    if let Some(pb) = &pb {
        if teardown.is_clean() {
            spin_ok(pb, "environment removed");
        } else {
            spin_fail(pb, "environment removed with errors");
        }
    }

    if json {
        let report = Rehearsal {
            ok: failure.is_none() && teardown.is_clean(),
            setup: setup.as_ref(),
            reimport: reimported.as_ref(),
            failure,
            imported: repository.imports().len(),
            teardown: &teardown,
        };
        println!("{}", json_pretty(&report)?);
        return Ok(exit_code(report.failure.is_some(), &teardown));
    }

    for handle in setup.iter().chain(reimported.iter()) {
        println!("trace: {}", render_trace(&handle.trace));
    }
    println!("imported {} files", repository.imports().len());
    if let Some(f) = &failure {
        println!("failed at {}: {}", f.stage, f.message);
        if !f.trace.is_empty() {
            println!("trace: {}", render_trace(&f.trace));
        }
    }
    for diagnostic in &teardown.diagnostics {
        println!("  teardown: {diagnostic}");
    }
    Ok(exit_code(failure.is_some(), &teardown))
}

fn exit_code(failed: bool, teardown: &TeardownReport) -> u8 {
    if failed {
        EXIT_SETUP_FAILED
    } else if !teardown.is_clean() {
        EXIT_TEARDOWN_DIRTY
    } else {
        EXIT_SUCCESS
    }
}

fn render_trace(trace: &[ImportState]) -> String {
    trace
        .iter()
        .map(|s| colorize_state(&s.to_string()))
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Copy the scripts folder into a temporary directory and make `name` end
/// with a failing command. The returned directory must outlive the run.
fn inject_failure(settings: &mut TestSettings, name: &str) -> Result<tempfile::TempDir, String> {
    let dir = tempfile::tempdir().map_err(|e| format!("failed to create temp dir: {e}"))?;
    let entries = fs::read_dir(&settings.scripts_path)
        .map_err(|e| format!("failed to read {}: {e}", settings.scripts_path.display()))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() {
            fs::copy(&path, dir.path().join(entry.file_name()))
                .map_err(|e| format!("failed to copy {}: {e}", path.display()))?;
        }
    }

    let script = dir.path().join(name);
    if !script.is_file() {
        return Err(format!(
            "no script named '{name}' in {}",
            settings.scripts_path.display()
        ));
    }
    let mut file = fs::OpenOptions::new()
        .append(true)
        .open(&script)
        .map_err(|e| format!("failed to open {}: {e}", script.display()))?;
    writeln!(file, "\nfail injected failure")
        .map_err(|e| format!("failed to write {}: {e}", script.display()))?;

    settings.scripts_path = dir.path().to_path_buf();
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inject_failure_appends_to_copy_only() {
        let scripts = tempfile::tempdir().unwrap();
        fs::write(scripts.path().join("script_base.txt"), "echo base").unwrap();
        fs::write(scripts.path().join("script_publish.txt"), "publishProject\n").unwrap();
        let mut settings = TestSettings::new("/data", "/data.tmp", scripts.path());

        let copy = inject_failure(&mut settings, "script_base.txt").unwrap();
        assert_eq!(settings.scripts_path, copy.path());
        let injected = fs::read_to_string(copy.path().join("script_base.txt")).unwrap();
        assert_eq!(injected, "echo base\nfail injected failure\n");
        assert_eq!(
            fs::read_to_string(scripts.path().join("script_base.txt")).unwrap(),
            "echo base"
        );
        assert!(copy.path().join("script_publish.txt").is_file());
    }

    #[test]
    fn inject_failure_rejects_unknown_script() {
        let scripts = tempfile::tempdir().unwrap();
        let mut settings = TestSettings::new("/data", "/data.tmp", scripts.path());
        let err = inject_failure(&mut settings, "missing.txt").unwrap_err();
        assert!(err.contains("missing.txt"));
        assert_eq!(settings.scripts_path, scripts.path());
    }

    #[test]
    fn exit_code_prefers_setup_failure() {
        let clean = TeardownReport::default();
        let dirty = TeardownReport {
            diagnostics: vec!["purge: busy".to_owned()],
            ..TeardownReport::default()
        };
        assert_eq!(exit_code(false, &clean), EXIT_SUCCESS);
        assert_eq!(exit_code(false, &dirty), EXIT_TEARDOWN_DIRTY);
        assert_eq!(exit_code(true, &dirty), EXIT_SETUP_FAILED);
    }

    #[test]
    fn trace_is_joined_in_order() {
        let rendered = render_trace(&[ImportState::Base, ImportState::DefaultFolders]);
        let base = rendered.find("base").unwrap();
        let folders = rendered.find("default_folders").unwrap();
        assert!(base < folders);
        assert!(rendered.contains(" -> "));
    }
}
