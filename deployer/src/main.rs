//! Deployer - Entry Point
//!
//! Deploys a Node.js application to a remote host over SSH and prints the
//! deployment result as JSON.

use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use tracing::{error, info, warn};

use deployer::deploy::orchestrator::{Deployer, DeployerOptions};
use deployer::deploy::ssh::SshConnector;
use deployer::errors::DeployerError;
use deployer::filesys::file::File;
use deployer::http::client::HttpClient;
use deployer::logs::{init_logging, LogOptions};
use deployer::models::deployment::{DeploymentConfig, DeploymentRequest, DeploymentResult, UploadedFile};
use deployer::storage::settings::Settings;
use deployer::utils::version_info;

const USAGE: &str = "Usage: deployer --request=<request.json> [--archive=<app.zip>] \
[--settings=<settings.json>] [--output=<result.json>] [--version]";

#[tokio::main]
async fn main() -> ExitCode {
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
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => println!("{}", version),
            Err(e) => eprintln!("Unable to render version: {}", e),
        }
        return ExitCode::SUCCESS;
    }

    let Some(request_path) = cli_args.get("request") else {
        eprintln!("{}", USAGE);
        return ExitCode::from(2);
    };

    // Retrieve the settings file
    let settings = match cli_args.get("settings") {
        Some(path) => match File::new(path).read_json::<Settings>().await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Unable to read settings file: {}", e);
                return ExitCode::from(2);
            }
        },
        None => Settings::default(),
    };

    // Initialize logging; the guard flushes the file writer on drop
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.clone(),
        json_format: settings.json_logs,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let config = match load_config(request_path, cli_args.get("archive"), &settings).await {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid deployment request: {}", e);
            eprintln!("{} {}", "Invalid deployment request:".red().bold(), e);
            return ExitCode::from(2);
        }
    };

    let mut deployer = Deployer::new(
        Arc::new(SshConnector),
        DeployerOptions::from_settings(&settings),
    );
    match &settings.registry.base_url {
        Some(base_url) => match HttpClient::new(base_url, settings.registry.token.clone()) {
            Ok(client) => deployer = deployer.with_registry(Arc::new(client)),
            Err(e) => warn!("Agent registry disabled: {}", e),
        },
        None => info!("No agent registry configured"),
    }

    let result = deployer.deploy(&config).await;
    report(&result, cli_args.get("output")).await;

    if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn load_config(
    request_path: &str,
    archive_path: Option<&String>,
    settings: &Settings,
) -> Result<DeploymentConfig, DeployerError> {
    let mut request: DeploymentRequest = File::new(request_path).read_json().await?;

    if let Some(archive_path) = archive_path {
        let content_bytes = File::new(archive_path).read_bytes().await?;
        let name = Path::new(archive_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive.zip".to_string());
        request.uploaded_file = Some(UploadedFile {
            name,
            content_bytes,
        });
    }

    DeploymentConfig::from_request(
        request,
        &settings.defaults.target_path,
        settings.defaults.ssh_port,
    )
}

async fn report(result: &DeploymentResult, output_path: Option<&String>) {
    match serde_json::to_string_pretty(result) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Unable to render deployment result: {}", e),
    }

    if let Some(path) = output_path {
        if let Err(e) = File::new(path).write_json(result).await {
            error!("Unable to write deployment result to {}: {}", path, e);
        }
    }

    if result.success {
        eprintln!("{} {}", "✔".green().bold(), result.message.green());
    } else {
        eprintln!("{} {}", "✘".red().bold(), result.message.red());
    }
}
