//! Tusk
//!
//! Resumable upload server (`tusk serve`) and command-line client
//! (`tusk upload`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tusk::client::engine::DEFAULT_RETRY_DELAYS_MS;
use tusk::client::{HttpTransport, TransferConfig, TransferEngine, TransferError, TransferEvent};
use tusk::config::Config;
use tusk::routes;
use tusk::state::AppState;
use tusk::upload::DEFAULT_CHUNK_SIZE;

#[derive(Parser)]
#[command(name = "tusk")]
#[command(about = "Resumable upload server and client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the upload server (configured from the environment)
    Serve,

    /// Upload a file
    Upload {
        /// Path to the file to upload
        file: PathBuf,

        /// Creation endpoint
        #[arg(long, default_value = "http://localhost:1080/files")]
        endpoint: String,

        /// Largest chunk to send, in bytes
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,

        /// Delays before each retry, in milliseconds
        #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_RETRY_DELAYS_MS)]
        retry_delays: Vec<u64>,

        /// MIME type; guessed from the file name when omitted
        #[arg(long = "type")]
        filetype: Option<String>,

        /// Only upload files matching these types (e.g. `video/*,image/*`)
        #[arg(long, value_delimiter = ',')]
        allow: Vec<String>,

        /// Continue an earlier upload from its URL
        #[arg(long)]
        resume: Option<String>,
    },
}

fn log_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tusk=debug,tower_http=debug".into())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first so RUST_LOG from .env reaches the filter
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(log_filter())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve().await,
        Commands::Upload {
            file,
            endpoint,
            chunk_size,
            retry_delays,
            filetype,
            allow,
            resume,
        } => {
            let config = TransferConfig {
                chunk_size,
                retry_delays: retry_delays.into_iter().map(Duration::from_millis).collect(),
                allowed_file_types: allow,
            };
            upload(file, &endpoint, config, filetype, resume).await
        }
    }
}

async fn serve() -> anyhow::Result<()> {
    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting Tusk v{}", env!("CARGO_PKG_VERSION"));

    let state = AppState::from_config(config.clone())
        .await
        .context("Failed to initialize upload storage")?;

    // Expire idle sessions in the background
    let cleanup = state
        .service()
        .clone()
        .start_cleanup_task(config.upload.cleanup_interval());

    let app = routes::app(state);

    let addr: SocketAddr = config
        .bind_addr()
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind_addr()))?;
    tracing::info!("Tusk listening on {}", addr);
    tracing::info!("Uploads accepted at {}/files", config.server.public_url);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cleanup.abort();
    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn upload(
    file: PathBuf,
    endpoint: &str,
    config: TransferConfig,
    filetype: Option<String>,
    resume: Option<String>,
) -> anyhow::Result<()> {
    let transport = HttpTransport::new(endpoint)?;
    let mut engine = TransferEngine::new(Arc::new(transport), config);
    let mut events = engine.subscribe();

    let reporter = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TransferEvent::Progress {
                    bytes_uploaded,
                    bytes_total,
                } => {
                    let percent = if bytes_total == 0 {
                        100.0
                    } else {
                        bytes_uploaded as f64 / bytes_total as f64 * 100.0
                    };
                    tracing::info!(
                        uploaded = bytes_uploaded,
                        total = bytes_total,
                        "Progress {:.1}%",
                        percent
                    );
                }
                TransferEvent::Retrying {
                    attempt,
                    delay,
                    error,
                } => {
                    tracing::warn!(attempt = attempt, delay = ?delay, "Retrying: {}", error);
                }
                TransferEvent::Success { upload, .. } => {
                    tracing::info!(url = %upload.url, "Upload complete");
                }
                TransferEvent::Error { message } => {
                    tracing::error!("Upload error: {}", message);
                }
            }
        }
    });

    // Ctrl+C pauses the upload so it can be resumed later
    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, pausing upload...");
            cancel.cancel();
        }
    });

    let result = match resume {
        Some(url) => engine.resume_file(&url, &file).await,
        None => engine.upload_file(&file, filetype.as_deref()).await,
    };

    drop(engine);
    let _ = reporter.await;

    match result {
        Ok(outcome) => {
            println!("{}", outcome.upload.url);
            Ok(())
        }
        Err(TransferError::Cancelled {
            upload: Some(upload),
            offset,
        }) => {
            println!("Paused at byte {}. Resume with: --resume {}", offset, upload.url);
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to upload {}", file.display())),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
