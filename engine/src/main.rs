//! Discovery Daemon - Entry Point
//!
//! Keeps dynamic operator deployments on the best available device.

use std::collections::HashMap;
use std::env;

use discovery_engine::app::options::AppOptions;
use discovery_engine::app::run::run;
use discovery_engine::logs::{init_logging, LogLevel, LogOptions};
use discovery_engine::storage::layout::StorageLayout;
use discovery_engine::storage::repository::DocumentStore;
use discovery_engine::storage::settings::Settings;
use discovery_engine::utils::version_info;

use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
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
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    let layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file, missing means defaults
    let settings = match layout.settings_file().read_json_or_default::<Settings>().await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = settings.validate() {
        eprintln!("Invalid settings: {}", e);
        std::process::exit(1);
    }
    if cli_args.contains_key("check-config") {
        if let Err(e) = DocumentStore::open(layout.repositories_dir(), false).await {
            eprintln!("Invalid repositories: {}", e);
            std::process::exit(1);
        }
        println!("Configuration under {} is valid", layout.base_dir.display());
        return;
    }

    // Initialize logging
    let log_level = match cli_args.get("log-level").map(|l| l.parse::<LogLevel>()) {
        Some(Ok(level)) => level,
        Some(Err(e)) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
        None => settings.log_level,
    };
    let log_options = LogOptions {
        log_level,
        log_dir: Some(layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = AppOptions::from_settings(&settings, layout);
    info!(
        "Running discovery daemon {} ({}) with options: {:?}",
        version.version, version.git_hash, options
    );
    if options.deployer.deploy_command.is_empty() {
        warn!("No deploy command configured, every deployment attempt will fail");
    }

    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run the discovery daemon: {e}");
        std::process::exit(1);
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
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
