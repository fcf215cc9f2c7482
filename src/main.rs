//! Plugin Host CLI
//!
//! Inspects the remote plugins a host configuration declares and checks that
//! each one answers health checks over gRPC.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use plugin_connect::{PluginRegistry, TonicTransport};
use plugin_host::error::{EXIT_FATAL, EXIT_SUCCESS, EXIT_UNHEALTHY};
use plugin_host::{logging, register_remote_plugins, HostConfig};
use plugin_interface::{BackendPlugin, CheckHealthRequest, HealthStatus};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Plugin Host - talks to backend plugins served by other processes.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the host configuration file
    #[arg(short, long, env = "PLUGIN_HOST_CONFIG", default_value = "plugin-host.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List configured plugins and their remote connection settings
    List,

    /// Connect to remote plugins and run a health check against each
    Check {
        /// Only check this plugin
        #[arg(short, long)]
        plugin: Option<String>,

        /// Seconds to wait for each health check
        #[arg(short, long, default_value = "5")]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            EXIT_FATAL
        }
    };
    process::exit(code);
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();

    let config = HostConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    logging::init_logging(&config.log, cli.debug).context("Failed to initialise logging")?;
    debug!("Loaded configuration from {}", cli.config.display());

    match cli.command {
        Command::List => list(&config),
        Command::Check {
            plugin,
            timeout_secs,
        } => check(&config, plugin.as_deref(), Duration::from_secs(timeout_secs)).await,
    }
}

fn list(config: &HostConfig) -> Result<i32> {
    let remotes = config.remote_plugins()?;

    for plugin_id in config.plugin_ids() {
        match remotes.get(plugin_id) {
            Some(opts) => println!(
                "{}\tremote\t{}\ttls={}",
                plugin_id, opts.address, opts.tls_enabled
            ),
            None => println!("{}\tlocal", plugin_id),
        }

        if let Some(settings) = config.plugin_settings(plugin_id) {
            for (key, value) in settings
                .iter()
                .filter(|(key, _)| !key.starts_with("remote_server_"))
            {
                println!("  {} = {}", key, value);
            }
        }
    }

    Ok(EXIT_SUCCESS)
}

async fn check(config: &HostConfig, only: Option<&str>, timeout: Duration) -> Result<i32> {
    let registry = PluginRegistry::new();
    let transport = TonicTransport::new().with_connect_timeout(timeout);
    let registered = register_remote_plugins(config, &registry, &transport).await?;

    if let Some(plugin_id) = only {
        if !registered.iter().any(|id| id == plugin_id) {
            anyhow::bail!("{} is not a configured remote plugin", plugin_id);
        }
    }

    let mut healthy = true;
    for failure in registry.start_all().await {
        error!("Failed to start plugin {}: {}", failure.0, failure.1);
        if only.is_none_or(|id| id == failure.0) {
            healthy = false;
        }
    }

    for plugin_id in registered
        .iter()
        .filter(|id| only.is_none_or(|only| only == id.as_str()))
    {
        let Some(plugin) = registry.get(plugin_id).await else {
            continue;
        };

        if !check_plugin(plugin, timeout).await {
            healthy = false;
        }
    }

    registry.stop_all().await;

    Ok(if healthy { EXIT_SUCCESS } else { EXIT_UNHEALTHY })
}

async fn check_plugin(plugin: Arc<dyn BackendPlugin>, timeout: Duration) -> bool {
    let plugin_id = plugin.plugin_id().to_string();
    info!("Checking health of plugin {}", plugin_id);

    match tokio::time::timeout(timeout, plugin.check_health(CheckHealthRequest::default())).await
    {
        Ok(Ok(response)) => {
            let status = response.status();
            println!("{}\t{}\t{}", plugin_id, status.as_str_name(), response.message);
            status == HealthStatus::Ok
        }
        Ok(Err(e)) => {
            println!("{}\tERROR\t{}", plugin_id, e);
            false
        }
        Err(_) => {
            println!("{}\tTIMEOUT\tno answer within {:?}", plugin_id, timeout);
            false
        }
    }
}
