//! sftp-courier - Polling SFTP File Transfer Connector
//!
//! This is the main entry point for the sftp-courier application.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sftp_courier::config::{load_config, Config};
use sftp_courier::coordinator::TransferCoordinator;
use sftp_courier::inbound::{LocalDirectoryConsumer, LocalLockFactory, LockFactory, PollingScanner};
use sftp_courier::outbound::{OutboundDispatcher, OutboundMessage, Payload};
use sftp_courier::session::SftpSessionFactory;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

type Coordinator = TransferCoordinator<SftpSessionFactory>;

/// sftp-courier - Polling SFTP file transfer connector
#[derive(Parser, Debug)]
#[command(name = "sftp-courier")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll every inbound endpoint and deliver files locally
    Run,
    /// Upload a local file through an outbound endpoint
    Send {
        /// Name of the outbound endpoint
        #[arg(short, long)]
        endpoint: String,
        /// File to upload
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    setup_logging(&args.log_level, args.json_log)?;

    // Load configuration
    let config = load_config(&args.config)?;

    info!("sftp-courier v{}", sftp_courier::VERSION);
    info!("Configuration loaded from: {:?}", args.config);
    info!("Connector name: {}", config.connector.name);
    info!("Pool size: {}", config.connector.pool.limit());

    let factory = SftpSessionFactory::from_config(&config.connector)?;
    let coordinator = Arc::new(TransferCoordinator::new(
        config.connector.name.clone(),
        Arc::new(factory),
        config.connector.pool.clone(),
    ));

    let result = match args.command {
        Command::Run => run(&config, &coordinator).await,
        Command::Send { endpoint, file } => send(&config, &coordinator, &endpoint, file).await,
    };

    coordinator.log_health().await;
    coordinator.close().await;
    result
}

/// Start a scanner per inbound endpoint and wait for a shutdown signal
async fn run(config: &Config, coordinator: &Arc<Coordinator>) -> Result<()> {
    let locks: Arc<dyn LockFactory> = Arc::new(LocalLockFactory::new());
    let lock_timeout = Duration::from_millis(config.connector.lock_timeout);

    let mut scanners = Vec::new();
    let mut handles = Vec::new();
    for endpoint in &config.inbound {
        let deliver_to = endpoint
            .deliver_to
            .clone()
            .with_context(|| format!("Inbound endpoint '{}' has no deliver_to", endpoint.name))?;
        let frequency = Duration::from_millis(
            endpoint
                .polling_frequency
                .unwrap_or(config.connector.polling_frequency),
        );

        let scanner = Arc::new(
            PollingScanner::new(
                coordinator.clone(),
                endpoint.endpoint_address()?,
                config.policy_for(endpoint),
                Arc::new(LocalDirectoryConsumer::new(deliver_to)),
            )
            .with_lock_factory(locks.clone())
            .with_lock_timeout(lock_timeout),
        );
        info!("Watching '{}' at {}", endpoint.name, scanner.endpoint());

        if let Some(handle) = scanner.start(frequency) {
            handles.push(handle);
        }
        scanners.push(scanner);
    }

    if scanners.is_empty() {
        warn!("No inbound endpoints configured, nothing to poll");
        return Ok(());
    }

    shutdown_signal().await?;

    for scanner in &scanners {
        scanner.stop();
    }
    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Scanner task failed: {}", e);
        }
    }
    Ok(())
}

/// Upload one local file
async fn send(
    config: &Config,
    coordinator: &Arc<Coordinator>,
    name: &str,
    file: PathBuf,
) -> Result<()> {
    let endpoint = config
        .outbound_endpoint(name)
        .with_context(|| format!("Unknown outbound endpoint '{}'", name))?;

    let source = tokio::fs::File::open(&file)
        .await
        .with_context(|| format!("Failed to open {}", file.display()))?;

    let mut message = OutboundMessage::new(Payload::Stream(Box::new(source)));
    if let Some(original) = file.file_name().and_then(|n| n.to_str()) {
        message = message.with_original_filename(original);
    }

    let dispatcher = OutboundDispatcher::new(
        coordinator.clone(),
        endpoint.endpoint_address()?,
        config.policy_for(endpoint),
    );
    let sent = dispatcher.send(message).await?;
    info!("Uploaded {} to {} ({} bytes)", file.display(), sent.path, sent.bytes);
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        // On Windows, only handle Ctrl+C
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down...");
    }

    Ok(())
}

/// Setup logging based on configuration
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
