use super::{json_pretty, EXIT_SUCCESS, EXIT_TEARDOWN_DIRTY};
use testbed_core::RunLock;
use testbed_schema::TestSettings;
use testbed_store::{Purger, WorkspaceLayout};

pub fn run(
    settings: &TestSettings,
    dry_run: bool,
    keep_search_index: bool,
    json: bool,
) -> Result<u8, String> {
    let layout = WorkspaceLayout::new(settings.tmp_path());
    let _lock = RunLock::try_acquire(&layout.lock_file())
        .map_err(|e| format!("run lock: {e}"))?
        .ok_or_else(|| format!("{} is in use by another run", layout.root().display()))?;

    let report = Purger::new(layout).purge(keep_search_index, dry_run);
    if json {
        let payload = serde_json::json!({
            "dry_run": dry_run,
            "removed": report.removed,
            "retained": report.retained,
            "failures": report.failures,
            "root_removed": report.root_removed,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        let prefix = if dry_run { "would remove" } else { "removed" };
        println!("purge: {prefix} {} entries", report.removed.len());
        for kept in &report.retained {
            println!("  kept {kept}");
        }
        for failure in &report.failures {
            println!("  FAIL {failure}");
        }
    }

    if report.is_clean() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_TEARDOWN_DIRTY)
    }
}
