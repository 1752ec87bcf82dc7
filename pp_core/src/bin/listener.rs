use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use pp_core::{
    load_listener_config_from_env, run_listener, spawn_store_writer, Database, IngestMetrics,
    IngestPipeline, ListenerSettings, SnapshotScheduler, StateCache, ValkeyStore, ZmqConnector,
};

const METRICS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (config, config_path) = load_listener_config_from_env();

    let cache = match config.cache.url.as_deref() {
        Some(url) => match ValkeyStore::connect(url).await {
            Ok(store) => StateCache::new(Arc::new(store), config.cache.key_prefix.clone()),
            Err(err) => {
                warn!(
                    target: "powerplay::listener",
                    error = %err,
                    "cache.fallback=memory"
                );
                StateCache::in_memory()
            }
        },
        None => StateCache::in_memory(),
    };

    let database = Database::open(&config.database.path)?;
    database.migrate()?;
    let (writer, writer_handle) = spawn_store_writer(database);
    let writer = Arc::new(writer);

    let metrics = Arc::new(IngestMetrics::new());
    let mut pipeline = IngestPipeline::new(
        &config.feed,
        config.detection.clone(),
        cache.clone(),
        writer.clone(),
    )
    .with_metrics(Arc::clone(&metrics));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(forward_shutdown(tokio::signal::ctrl_c(), shutdown_tx));

    let scheduler = SnapshotScheduler::new(cache.clone(), writer.clone(), &config.snapshot);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx.clone()));
    let reporter_handle = tokio::spawn(report_metrics(Arc::clone(&metrics), shutdown_rx.clone()));

    info!(
        target: "powerplay::listener",
        endpoint = %config.feed.endpoint,
        database = %config.database.path.display(),
        config = ?config_path,
        "Powerplay listener ready"
    );

    let connector = ZmqConnector::new(config.feed.endpoint.clone());
    let settings = ListenerSettings::from_config(&config.feed);
    run_listener(&connector, &mut pipeline, &settings, shutdown_rx).await;

    let _ = scheduler_handle.await;
    let _ = reporter_handle.await;
    drop(pipeline);
    drop(writer);
    if writer_handle.join().is_err() {
        warn!(target: "powerplay::listener", "store.writer_panicked");
    }
    Ok(())
}

/// Flips `shutdown` once `signal` fires. If the handler cannot be installed
/// the sender is held forever so receivers never see a closed channel.
async fn forward_shutdown<F>(signal: F, shutdown: watch::Sender<bool>)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(err) = signal.await {
        warn!(target: "powerplay::listener", error = %err, "signal.install_failed");
        std::future::pending::<()>().await;
    }
    info!(target: "powerplay::listener", "signal.shutdown");
    let _ = shutdown.send(true);
}

async fn report_metrics(metrics: Arc<IngestMetrics>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let snapshot = metrics.snapshot();
                info!(
                    target: "powerplay::listener",
                    frames = snapshot.frames,
                    stored = snapshot.stored,
                    evicted = snapshot.evicted,
                    stale = snapshot.stale,
                    regressed = snapshot.regressed,
                    filtered = snapshot.undecodable
                        + snapshot.foreign_schema
                        + snapshot.version_mismatch
                        + snapshot.ignored_event
                        + snapshot.malformed,
                    snipes = snapshot.snipes,
                    reconnects = snapshot.reconnects,
                    "ingest.metrics"
                );
            }
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn failed_signal_handler_keeps_shutdown_open() {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        tokio::spawn(forward_shutdown(
            async { Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "no handler")) },
            shutdown_tx,
        ));

        let waited =
            tokio::time::timeout(Duration::from_secs(3600), shutdown_rx.changed()).await;
        assert!(waited.is_err(), "shutdown resolved early: {waited:?}");
        assert!(!*shutdown_rx.borrow());
    }

    #[tokio::test]
    async fn signal_flips_shutdown() {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        tokio::spawn(forward_shutdown(async { Ok::<(), std::io::Error>(()) }, shutdown_tx));

        assert!(shutdown_rx.changed().await.is_ok());
        assert!(*shutdown_rx.borrow());
    }
}
