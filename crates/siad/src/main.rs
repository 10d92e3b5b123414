//! siad — Galaxy SIA alarm-reporting receiver.

mod connection;
mod listener;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;

use sia_core::config::SiaConfig;
use sia_services::DispatchQueue;
use sia_services::DispatchWorker;

fn init_logging(config: &SiaConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.directory.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        None
    } else {
        let file_appender = tracing_appender::rolling::daily(&config.logging.directory, "siad.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(non_blocking)
            .init();
        Some(guard)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = SiaConfig::write_default_if_missing()?;
    let config = SiaConfig::load()?;
    let _log_guard = init_logging(&config);
    let config = Arc::new(config);

    tracing::info!(
        config = %config_path.display(),
        port = config.listener.port,
        ip_check_enabled = config.ip_check.enabled,
        "siad starting"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let queue = DispatchQueue::new(config.queue.max_size);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.queue.http_timeout_secs))
        .build()?;
    let dispatch_worker = DispatchWorker::new(
        queue.clone(),
        client,
        config.queue.max_retries,
        Duration::from_secs(config.queue.max_retry_time_minutes * 60),
        shutdown_tx.subscribe(),
    );
    let dispatch_task = tokio::spawn(dispatch_worker.run());

    let sia_task = tokio::spawn(listener::run_sia_listener(
        config.clone(),
        queue.clone(),
        shutdown_tx.subscribe(),
    ));

    let ip_check_task = tokio::spawn(listener::run_ip_check_listener(
        config.clone(),
        shutdown_tx.subscribe(),
    ));

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, draining connections");
    let _ = shutdown_tx.send(());

    // Grace period for in-flight connections and queued deliveries to finish.
    tokio::time::sleep(Duration::from_secs(2)).await;

    for (name, task) in [
        ("sia listener", sia_task),
        ("ip-check listener", ip_check_task),
    ] {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(task = name, error = %e, "task returned an error"),
            Err(e) => tracing::warn!(task = name, error = %e, "task panicked"),
        }
    }
    dispatch_task.abort();

    tracing::info!("siad stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
