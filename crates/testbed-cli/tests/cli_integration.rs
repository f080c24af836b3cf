//! CLI subprocess integration tests.
//!
//! These tests invoke the `testbed` binary as a subprocess and verify
//! exit codes, stdout content, and JSON output stability.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const PROPERTIES: &str = "\
pool.setup.dbName=mysql
pool.setup.jdbcUrl=mock://localhost/
pool.setup.user=root
pool.default.dbName=testbed
pool.default.jdbcUrl=mock://localhost/
pool.default.user=testbed
pool.default.password=hunter2
";

struct Project {
    dir: tempfile::TempDir,
}

impl Project {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("data/work/config")).unwrap();
        fs::write(root.join("data/work/config/testbed.properties"), PROPERTIES).unwrap();

        fs::create_dir_all(root.join("scripts")).unwrap();
        for (name, body) in [
            ("script_base.txt", "echo base\n"),
            ("script_default_folders.txt", "echo folders\n"),
            ("script_default_projects.txt", "createProject Offline\n"),
            ("script_publish.txt", "publishProject\n"),
            ("script_import.txt", "echo reimport\n"),
            ("script_import_publish.txt", "publishProject\n"),
        ] {
            fs::write(root.join("scripts").join(name), body).unwrap();
        }

        fs::create_dir_all(root.join("import")).unwrap();
        fs::write(root.join("import/base.zip"), "zip").unwrap();
        fs::write(root.join("import/content.zip"), "zip").unwrap();

        fs::write(
            root.join("testbed.toml"),
            r#"data_path = "data"
scripts_path = "scripts"
teardown_grace_ms = 0

[import]
folders = ["import"]
"#,
        )
        .unwrap();
        Self { dir }
    }

    fn settings(&self) -> PathBuf {
        self.dir.path().join("testbed.toml")
    }

    fn working_copy(&self) -> PathBuf {
        self.dir.path().join("data.tmp")
    }

    fn run(&self, args: &[&str]) -> Output {
        testbed_bin()
            .arg("--settings")
            .arg(self.settings())
            .args(args)
            .output()
            .unwrap()
    }
}

fn testbed_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_testbed"));
    cmd.env_remove("TESTBED_LOG");
    cmd
}

fn json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({e}): {}\nstderr: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

fn states(value: &serde_json::Value) -> Vec<&str> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s.as_str().unwrap())
        .collect()
}

#[test]
fn cli_version_exits_zero() {
    let output = testbed_bin().arg("--version").output().unwrap();
    assert!(output.status.success(), "testbed --version must exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("testbed"),
        "version output must contain 'testbed': {stdout}"
    );
}

#[test]
fn cli_help_lists_commands() {
    let output = testbed_bin().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["config", "rehearse", "purge"] {
        assert!(stdout.contains(command), "help must list '{command}'");
    }
}

#[test]
fn cli_missing_settings_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = testbed_bin()
        .arg("--settings")
        .arg(dir.path().join("absent.toml"))
        .arg("config")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("configuration error"), "stderr: {stderr}");
}

#[test]
fn cli_config_json_redacts_password() {
    let project = Project::new();
    let output = project.run(&["--json", "config"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("hunter2"), "password leaked: {stdout}");

    let v = json(&output);
    assert_eq!(v["database"]["dialect"], "mysql");
    assert_eq!(v["database"]["profiles"]["default"]["db_name"], "testbed");
    assert_eq!(v["import_sources"].as_array().unwrap().len(), 2);
    assert!(
        !project.working_copy().exists(),
        "config must not materialize the working copy"
    );
}

#[test]
fn cli_config_text_lists_profiles() {
    let project = Project::new();
    let output = project.run(&["config"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("dialect:      mysql"));
    assert!(stdout.contains("testbed@mock://localhost/testbed"));
    assert!(!stdout.contains("hunter2"));
}

#[test]
fn cli_rehearse_publish_round_trip() {
    let project = Project::new();
    let output = project.run(&["--json", "rehearse", "--publish"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let v = json(&output);
    assert_eq!(v["ok"], true);
    assert_eq!(
        states(&v["setup"]["trace"]),
        [
            "base",
            "default_folders",
            "import_data",
            "default_projects",
            "publish",
            "ready"
        ]
    );
    assert_eq!(v["setup"]["identity"]["project"], "Offline");
    assert_eq!(v["imported"], 2);
    assert_eq!(v["teardown"]["purge"]["root_removed"], true);
    assert!(!project.working_copy().exists());
}

#[test]
fn cli_rehearse_unlock_and_reimport() {
    let project = Project::new();
    let output = project.run(&["--json", "rehearse", "--reimport"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let v = json(&output);
    assert!(states(&v["setup"]["trace"]).contains(&"unlock"));
    assert_eq!(
        states(&v["reimport"]["trace"]),
        ["reimport", "import_data", "publish", "ready"]
    );
    assert_eq!(v["imported"], 4);
}

#[test]
fn cli_rehearse_recovers_from_flaky_create() {
    let project = Project::new();
    let output = project.run(&["--json", "rehearse", "--flaky-create", "1"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(json(&output)["ok"], true);
}

#[test]
fn cli_rehearse_injected_failure_reports_stage() {
    let project = Project::new();
    let output = project.run(&[
        "--json",
        "rehearse",
        "--fail-script",
        "script_default_projects.txt",
    ]);
    assert_eq!(output.status.code(), Some(3));

    let v = json(&output);
    assert_eq!(v["ok"], false);
    assert_eq!(v["failure"]["stage"]["stage"], "import");
    assert_eq!(v["failure"]["stage"]["state"], "default_projects");
    assert_eq!(
        states(&v["failure"]["trace"]),
        ["base", "default_folders", "import_data", "default_projects"]
    );
    assert!(!project.working_copy().exists(), "teardown must still run");
    assert_eq!(
        fs::read_to_string(project.dir.path().join("scripts/script_default_projects.txt"))
            .unwrap(),
        "createProject Offline\n",
        "the configured scripts folder must not be modified"
    );
}

#[test]
fn cli_rehearse_unknown_fail_script() {
    let project = Project::new();
    let output = project.run(&["rehearse", "--fail-script", "nope.txt"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("nope.txt"));
}

#[test]
fn cli_rehearse_text_output() {
    let project = Project::new();
    let output = project.run(&["rehearse", "--publish"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("trace: "));
    assert!(stdout.contains("imported 2 files"));
}

#[test]
fn cli_rehearse_with_process_shell() {
    let project = Project::new();
    let scripts = project.dir.path().join("scripts");
    for entry in fs::read_dir(&scripts).unwrap() {
        fs::write(entry.unwrap().path(), "true\n").unwrap();
    }

    let output = project.run(&["--json", "rehearse", "--shell", "process:sh -s"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let v = json(&output);
    assert_eq!(v["ok"], true);
    assert_eq!(states(&v["setup"]["trace"]).last(), Some(&"ready"));
    assert_eq!(v["setup"]["identity"]["project"], "Offline");
    assert_eq!(v["imported"], 2);
}

fn leave_working_copy(root: &Path) {
    fs::create_dir_all(root.join("work/config")).unwrap();
    fs::create_dir_all(root.join("work/index")).unwrap();
    fs::create_dir_all(root.join("export")).unwrap();
    fs::write(root.join("work/index/segments"), "idx").unwrap();
}

#[test]
fn cli_purge_dry_run_keeps_files() {
    let project = Project::new();
    leave_working_copy(&project.working_copy());

    let output = project.run(&["--json", "purge", "--dry-run"]);
    assert!(output.status.success());
    let v = json(&output);
    assert_eq!(v["dry_run"], true);
    assert!(!v["removed"].as_array().unwrap().is_empty());
    assert!(project.working_copy().join("export").is_dir());
}

#[test]
fn cli_purge_removes_leftovers() {
    let project = Project::new();
    leave_working_copy(&project.working_copy());

    let output = project.run(&["--json", "purge"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(json(&output)["root_removed"], true);
    assert!(!project.working_copy().exists());
}

#[test]
fn cli_purge_can_keep_search_index() {
    let project = Project::new();
    leave_working_copy(&project.working_copy());

    let output = project.run(&["--json", "purge", "--keep-search-index"]);
    assert!(output.status.success());
    let v = json(&output);
    assert_eq!(v["root_removed"], false);
    assert!(project.working_copy().join("work/index/segments").is_file());
    assert!(!project.working_copy().join("export").exists());
}
