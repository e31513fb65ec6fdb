//! Parchive Realtime Filler
//!
//! Reads parameter batches as JSON lines on stdin and archives them.
//!
//! ## Input
//!
//! One batch per line; parameter ids are object keys:
//!
//! ```text
//! {"timestamp": 1700000000000, "values": {"1": {"type": "float64", "value": 21.5}}}
//! ```
//!
//! ## Configuration
//!
//! A TOML file given as the first argument or in `PARCHIVE_CONFIG`. Without
//! one, defaults apply. `PARCHIVE_*` variables override individual filler
//! settings (see `FillerConfig::apply_env_overrides`).
//!
//! ```toml
//! metrics_addr = "0.0.0.0:9100"
//!
//! [filler]
//! processor_name = "realtime"
//! sorting_threshold_ms = 1000
//!
//! [archive]
//! root = "./data/archive"
//!
//! [registry]
//! path = "./data/groups.db"
//! ```
//!
//! `metrics_addr` serves `/metrics`, `/health` and `/ready`; the latter turns
//! 503 once shutdown has started.
//!
//! ## Shutdown
//!
//! End of input, SIGINT or SIGTERM flush every queue and wait for pending
//! archive writes (bounded by `filler.shutdown_timeout_secs`).
//!
//! ## Logging
//! `RUST_LOG` sets the filter (default `info`); `PARCHIVE_LOG_FORMAT=json`
//! switches to JSON output.

use std::collections::BTreeMap;
use std::sync::Arc;

use parchive_core::{ParameterBatch, ParameterId, Timestamp, Value};
use parchive_metadata::{CacheConfig, CachedGroupIdStore, GroupIdStore, SqliteGroupIdStore};
use parchive_storage::{ObjectStoreArchive, ParchiveConfig, RealtimeFiller};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Debug, Deserialize)]
struct BatchLine {
    timestamp: Timestamp,
    values: BTreeMap<ParameterId, Value>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    parchive_observability::init_tracing();
    parchive_observability::init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PARCHIVE_CONFIG").ok());

    let config = match &config_path {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path);
            ParchiveConfig::load(path)?
        }
        None => ParchiveConfig::from_toml_str("")?,
    };

    // Group registry
    let cache = CacheConfig {
        capacity: config.registry.cache_capacity,
    };
    let groups: Arc<dyn GroupIdStore> = match &config.registry.path {
        Some(path) => {
            tracing::info!("Opening group registry at {}", path.display());
            Arc::new(CachedGroupIdStore::with_config(
                SqliteGroupIdStore::new(path).await?,
                cache,
            ))
        }
        None => {
            tracing::warn!("No registry path configured, group ids will not survive a restart");
            Arc::new(CachedGroupIdStore::with_config(
                SqliteGroupIdStore::new_in_memory().await?,
                cache,
            ))
        }
    };

    // Archive
    let object_store: Arc<dyn object_store::ObjectStore> = match &config.archive.root {
        Some(root) => {
            std::fs::create_dir_all(root)?;
            tracing::info!("Using local archive at {}", root.display());
            Arc::new(object_store::local::LocalFileSystem::new_with_prefix(root)?)
        }
        None => {
            tracing::warn!("No archive root configured, segments are kept in memory only");
            Arc::new(object_store::memory::InMemory::new())
        }
    };
    let archive = Arc::new(ObjectStoreArchive::new(object_store, &config.archive));

    let filler = Arc::new(RealtimeFiller::new(config.filler.clone(), archive, groups)?);

    if let Some(addr) = &config.metrics_addr {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(addr = %addr, "Metrics server listening");
        let ready = Arc::clone(&filler);
        let app = parchive_observability::exporter::create_router(Arc::new(move || {
            !ready.is_shutting_down()
        }));
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Metrics server failed: {}", e);
            }
        });
    }

    let (tx, rx) = mpsc::channel::<ParameterBatch>(1024);
    let subscriber = filler.spawn_subscriber(rx);

    let input = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut line_no = 0u64;

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Failed to read input: {}", e);
                    break;
                }
            };
            line_no += 1;

            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<BatchLine>(&line) {
                Ok(batch) => {
                    let batch = ParameterBatch::new(batch.timestamp, batch.values);
                    if tx.send(batch).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(line = line_no, error = %e, "Skipping malformed batch"),
            }
        }
    });

    tracing::info!(
        processor = %filler.processor_name(),
        "Parchive realtime filler started"
    );

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = input => {
            tracing::info!("Input closed, initiating graceful shutdown");
            // Let the subscriber drain what is already queued
            let _ = subscriber.await;
        },
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }

    let summary = filler.shutdown().await;
    tracing::info!(
        flushed_segments = summary.flushed_segments,
        drained = summary.drained,
        "Parchive realtime filler shut down"
    );

    Ok(())
}
