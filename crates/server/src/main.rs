use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use encodarr_core::events::{EventStore, SqliteEventStore};
use encodarr_core::poller::ItemResolver;
use encodarr_core::supervisor::FfprobeProbe;
use encodarr_core::torrent::LibrqbitClient;
use encodarr_core::{
    create_event_system, load_config, validate_config, AdmissionQueue, Coordinator,
    DirectoryPublisher, Encoder, HttpFeedSource, PipelineEvent, ProcessRegistry,
    ProcessSupervisor, SourcePoller, SqliteLedger, TitleResolver, TorrentTransport,
};
use encodarr_server::api::create_router;
use encodarr_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for the event channel
const EVENT_BUFFER_SIZE: usize = 1000;

/// How long shutdown waits for item tasks to finish publishing
const ITEM_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    let json = std::env::var("ENCODARR_LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn run() -> Result<()> {
    init_logging();

    // Determine config path
    let config_path = std::env::var("ENCODARR_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Variants: {:?}", config.pipeline.variants);
    info!("Database path: {:?}", config.database.path);

    // Compute config hash for the event log
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = &config_hash[..16];

    // Stores
    let ledger = Arc::new(
        SqliteLedger::new(&config.database.path).context("Failed to open completion ledger")?,
    );
    info!("Completion ledger initialized");

    let event_store: Arc<dyn EventStore> = Arc::new(
        SqliteEventStore::new(&config.database.path).context("Failed to create event store")?,
    );
    info!("Event store initialized");

    let (event_handle, event_writer) =
        create_event_system(Arc::clone(&event_store), EVENT_BUFFER_SIZE);
    let writer_handle = tokio::spawn(event_writer.run());

    event_handle
        .emit(PipelineEvent::ServiceStarted {
            version: VERSION.to_string(),
            config_hash: config_hash_short.to_string(),
        })
        .await;

    // Kill encoders left behind by a previous run
    let registry = Arc::new(ProcessRegistry::new(config.registry.path.clone()));
    match registry.recover() {
        Ok(pids) if !pids.is_empty() => {
            warn!(count = pids.len(), "Killed orphaned encode processes");
            event_handle
                .emit(PipelineEvent::OrphansKilled { pids })
                .await;
        }
        Ok(_) => {}
        Err(e) => warn!("Failed to recover process registry: {}", e),
    }

    let supervisor = Arc::new(ProcessSupervisor::new(
        config.encoder.clone(),
        config.paths.progress_file.clone(),
        Arc::clone(&registry),
        Arc::new(FfprobeProbe::new(config.encoder.ffprobe_path.clone())),
    ));

    // Admission gate in front of the encode stage
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let queue = Arc::new(AdmissionQueue::new());
    let admit_handle = {
        let queue = Arc::clone(&queue);
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move { queue.admit(shutdown).await })
    };

    // Transport and publisher
    info!(
        "Initializing embedded torrent client (download path: {:?})",
        config.torrent.download_path
    );
    let torrent_client = LibrqbitClient::new(&config.torrent)
        .await
        .context("Failed to initialize torrent client")?;
    let transport = Arc::new(TorrentTransport::new(
        Arc::new(torrent_client),
        &config.torrent,
        config.retry.clone(),
    ));
    let publisher = Arc::new(DirectoryPublisher::new(&config.publisher));

    let coordinator = Arc::new(
        Coordinator::new(
            config.pipeline.clone(),
            config.paths.encode_dir.clone(),
            ledger,
            Arc::clone(&queue),
            supervisor.clone(),
            transport,
            publisher,
        )
        .with_events(event_handle.clone()),
    );

    // Source poller
    let poller = if config.poller.feeds.is_empty() {
        info!("No feeds configured, source poller disabled");
        None
    } else {
        let source = HttpFeedSource::new(&config.poller, config.retry.clone())
            .context("Failed to create feed source")?;
        let resolver: Arc<dyn ItemResolver> = match &config.poller.title_pattern {
            Some(pattern) => Arc::new(TitleResolver::with_pattern(pattern)?),
            None => Arc::new(TitleResolver::new()?),
        };
        let poller = Arc::new(
            SourcePoller::new(
                config.poller.clone(),
                Arc::new(source),
                resolver,
                Arc::clone(&coordinator),
            )
            .with_events(event_handle.clone()),
        );
        tokio::spawn(Arc::clone(&poller).run(shutdown_tx.subscribe()));
        Some(poller)
    };

    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::clone(&coordinator),
        Arc::clone(&registry),
        Arc::clone(&event_store),
        poller,
    ));
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Stop intake, then tear down running encodes
    info!("Server shutting down...");
    let _ = shutdown_tx.send(());
    queue.close();
    let cancelled = supervisor.cancel_all();
    if cancelled > 0 {
        info!(cancelled, "Cancelled running encodes");
    }
    // Cancelled items still publish and record what they already encoded
    let pending = coordinator.active_tasks();
    if pending > 0 {
        info!(pending, "Waiting for item tasks to finish");
        if !coordinator.wait_idle(ITEM_DRAIN_TIMEOUT).await {
            warn!(
                remaining = coordinator.active_tasks(),
                "Timed out waiting for item tasks"
            );
        }
    }
    let killed = registry.kill_all();
    if !killed.is_empty() {
        warn!(?killed, "Killed encode processes still registered");
    }
    let _ = admit_handle.await;

    event_handle
        .emit(PipelineEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // The writer stops once every handle is gone. The coordinator and
    // poller hold clones, so they go first.
    drop(coordinator);
    drop(event_handle);

    match tokio::time::timeout(Duration::from_secs(5), writer_handle).await {
        Ok(_) => info!("Event writer stopped"),
        Err(_) => warn!("Timed out waiting for event writer"),
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
