//! piped - Entry Point
//!
//! Runs deployments of applications through platform plugins and serves the
//! operator API.

use std::collections::HashMap;
use std::env;

use anyhow::Context;
use piped::app::options::AppOptions;
use piped::app::run::run;
use piped::filesys::file::File;
use piped::logs::{init_logging, LogOptions};
use piped::plugins::PluginRegistry;
use piped::storage::layout::StorageLayout;
use piped::storage::settings::Settings;
use piped::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        println!("{}", serde_json::to_string_pretty(&version)?);
        return Ok(());
    }

    let layout = match cli_args.get("data-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file
    let settings_file = match cli_args.get("settings") {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };
    let settings = Settings::load(&settings_file).await.with_context(|| {
        format!("unable to read settings file {}", settings_file.path().display())
    })?;

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log.level.clone(),
        json_format: settings.log.json,
        log_dir: settings
            .log
            .file_output
            .then(|| layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = AppOptions::from_settings(&settings, layout);
    let plugins = PluginRegistry::from_settings(&settings);

    info!("Running piped {} with options: {:?}", version.version, options);
    run(options, plugins, await_shutdown_signal())
        .await
        .inspect_err(|e| error!("Failed to run piped: {e}"))
        .context("piped stopped with an error")
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
