use super::{json_pretty, EXIT_SUCCESS};
use serde::Serialize;
use std::path::PathBuf;
use testbed_core::ImportSources;
use testbed_schema::{ConnectionProfile, DbConfig, Properties, TestSettings};
use testbed_store::WorkspaceLayout;

#[derive(Serialize)]
struct ConfigView<'a> {
    settings: &'a TestSettings,
    database: &'a DbConfig,
    search_paths: Vec<PathBuf>,
    import_sources: Vec<PathBuf>,
}

/// Read the properties straight from the pristine data folder; nothing is
/// copied or locked.
pub fn run(settings: &TestSettings, json: bool) -> Result<u8, String> {
    let layout = WorkspaceLayout::new(&settings.data_path);
    let props = Properties::load(&layout.properties_file(&settings.properties_file))
        .map_err(|e| format!("configuration error: {e}"))?;
    let db = DbConfig::from_properties(&props, settings.dialect, &settings.additional_profile)
        .map_err(|e| format!("configuration error: {e}"))?;

    let search_paths: Vec<PathBuf> = std::iter::once(settings.tmp_path())
        .chain(db.test_data_paths.iter().map(|p| settings.data_path.join(p)))
        .collect();
    let import_sources = ImportSources::resolve(&settings.import.modules, &settings.import.folders);

    if json {
        let view = ConfigView {
            settings,
            database: &db,
            search_paths,
            import_sources,
        };
        println!("{}", json_pretty(&view)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("dialect:      {}", db.dialect);
    println!("data path:    {}", settings.data_path.display());
    println!("working copy: {}", settings.tmp_path().display());
    println!("scripts:      {}", settings.scripts_path.display());
    println!("profiles:");
    for profile in db.profiles.targets() {
        print_profile(profile);
    }
    print_profile(&db.profiles.setup);
    println!("search paths:");
    for path in &search_paths {
        println!("  {}", path.display());
    }
    if import_sources.is_empty() {
        println!("import sources: none");
    } else {
        println!("import sources:");
        for source in &import_sources {
            println!("  {}", source.display());
        }
    }
    if db.keep_search_index {
        println!("search index is kept on teardown");
    }
    Ok(EXIT_SUCCESS)
}

fn print_profile(profile: &ConnectionProfile) {
    let name = profile.name().to_string();
    println!(
        "  {name:<12} {}@{}{} ({})",
        profile.user(),
        profile.url(),
        profile.db_name(),
        profile.driver()
    );
}
