mod commands;

use clap::{Parser, Subcommand};
use commands::{EXIT_CONFIG_ERROR, EXIT_FAILURE};
use std::path::PathBuf;
use std::process::ExitCode;
use testbed_schema::TestSettings;

#[derive(Parser)]
#[command(
    name = "testbed",
    version,
    about = "Provision, populate and tear down disposable repository test environments"
)]
struct Cli {
    /// Path to the run settings file.
    #[arg(long, short = 's', global = true, default_value = "testbed.toml")]
    settings: String,

    /// Output results as structured JSON.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, global = true, default_value_t = false)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the resolved configuration: dialect, profiles and data paths.
    Config,
    /// Run a full setup and teardown against the mock collaborators.
    Rehearse {
        /// Publish after the import instead of unlocking.
        #[arg(long, default_value_t = false)]
        publish: bool,
        /// Site root the import targets.
        #[arg(long, default_value = "/")]
        target: String,
        /// Folder of configuration files copied over the working copy.
        #[arg(long)]
        config_folder: Option<PathBuf>,
        /// Shell backend: `mock` or `process:<program> [args]`.
        #[arg(long, default_value = "mock")]
        shell: String,
        /// Run an incremental import once setup has succeeded.
        #[arg(long, default_value_t = false)]
        reimport: bool,
        /// Make the named setup script fail, to rehearse error handling.
        #[arg(long)]
        fail_script: Option<String>,
        /// Make the first N database creations fail.
        #[arg(long, default_value_t = 0)]
        flaky_create: u32,
    },
    /// Remove a working copy left behind by an aborted run.
    Purge {
        /// Report what would be removed without touching anything.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Keep the search index folder.
        #[arg(long, default_value_t = false)]
        keep_search_index: bool,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("TESTBED_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let settings_path = expand_tilde(&cli.settings);
    let json_output = cli.json;

    let result = TestSettings::load(&settings_path)
        .map_err(|e| format!("configuration error: {}: {e}", settings_path.display()))
        .and_then(|settings| match cli.command {
            Commands::Config => commands::config::run(&settings, json_output),
            Commands::Rehearse {
                publish,
                target,
                config_folder,
                shell,
                reimport,
                fail_script,
                flaky_create,
            } => commands::rehearse::run(
                settings,
                &commands::rehearse::RehearseOptions {
                    publish,
                    target,
                    config_folder,
                    shell,
                    reimport,
                    fail_script,
                    flaky_create,
                },
                json_output,
            ),
            Commands::Purge {
                dry_run,
                keep_search_index,
            } => commands::purge::run(&settings, dry_run, keep_search_index, json_output),
        });

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("configuration error:") {
                EXIT_CONFIG_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
