use anyhow::Result;
use clap::Parser;
use devmon::*;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::writer::MakeWriterExt;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

fn init_tracing(app_config: &config::AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(app_config.log_directive()));
    let builder = tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter);

    match &app_config.paths.log {
        Some(path) => {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            builder
                .with_ansi(false)
                .with_writer(std::io::stderr.and(std::sync::Mutex::new(file)))
                .init();
        }
        None => builder.init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let app_config = config::AppConfig::load(args.config.as_deref(), &args.overrides())?;
    init_tracing(&app_config)?;

    let metrics_repo = Arc::new(metrics_repo::MetricsRepo::connect(&app_config.paths.database).await?);
    if let Err(e) = metrics_repo.init().await {
        metrics_repo.close().await;
        return Err(e);
    }

    let result = match args.command.unwrap_or(cli::Commands::Run) {
        cli::Commands::Run => run(app_config, metrics_repo.clone()).await,
        cli::Commands::ListSends => list_sends(&metrics_repo).await,
        cli::Commands::SearchSend(a) => search_send(&metrics_repo, &a.key).await,
        cli::Commands::ShowCollection(a) => {
            show_collection(&metrics_repo, a.timestamp.as_deref(), a.format).await
        }
    };

    metrics_repo.close().await;
    result
}

async fn list_sends(repo: &metrics_repo::MetricsRepo) -> Result<()> {
    let summaries = repo.get_delivery_summaries().await?;
    print!("{}", report::render_summaries(&summaries));
    Ok(())
}

async fn search_send(repo: &metrics_repo::MetricsRepo, key: &str) -> Result<()> {
    let hour = models::parse_aggregation_key(key)
        .ok_or_else(|| anyhow::anyhow!("invalid aggregation key {:?} (expected YYYY-MM-DD HH:00)", key))?;
    let key = models::aggregation_key(hour);
    match repo.get_delivery_summary(&key).await? {
        Some(summary) => print!("{}", report::render_summary(&summary)),
        None => println!("No send attempt found for {}", key),
    }
    Ok(())
}

async fn show_collection(
    repo: &metrics_repo::MetricsRepo,
    timestamp: Option<&str>,
    format: report::OutputFormat,
) -> Result<()> {
    let prefix = report::collection_prefix(timestamp, chrono::Utc::now());
    let samples = repo.get_samples_matching(&prefix).await?;
    if samples.is_empty() {
        println!(
            "No collection data found for {}",
            timestamp.unwrap_or("current hour")
        );
    } else {
        println!("{}", report::render_samples(&samples, format)?);
    }
    Ok(())
}

async fn run(app_config: config::AppConfig, metrics_repo: Arc<metrics_repo::MetricsRepo>) -> Result<()> {
    // Without a telemetry backend nothing can ever be sampled: fail startup.
    let source: Arc<dyn sampler::SnapshotSource> = Arc::new(
        sampler::SysinfoSource::new().map_err(|e| anyhow::anyhow!("sampler init: {}", e))?,
    );

    let client = Arc::new(delivery::DeliveryClient::new(delivery::DeliveryConfig {
        url: app_config.server.url.clone(),
        contract_number: app_config.server.contract_number.clone(),
        offline: app_config.server.offline,
        timeout_secs: app_config.server.timeout_secs,
        max_retries: app_config.server.max_retries,
    })?);
    if client.is_offline() {
        tracing::warn!("running in OFFLINE mode; aggregates are kept but not sent");
    } else {
        tracing::info!(
            url = %app_config.server.url,
            max_retries = client.max_retries(),
            "delivery enabled"
        );
    }

    let pipeline_config = aggregation_worker::AggregationWorkerConfig {
        aggregation_interval_secs: app_config.intervals.aggregation_secs,
        delivery_interval_secs: app_config.intervals.delivery_secs,
        pending_days: app_config.retention.pending_days,
        retention: retention::RetentionPolicy {
            raw_days: app_config.retention.raw_days,
            aggregate_days: app_config.retention.aggregate_days,
        },
        cleanup_schedule: app_config.retention.cleanup_schedule.clone(),
        cleanup_interval_secs: app_config.retention.cleanup_interval_secs,
    };

    if let Err(e) = backfill::run_backfill(metrics_repo.clone(), client.clone(), &pipeline_config).await {
        tracing::warn!(error = %e, "startup backfill failed");
    }

    let (worker_shutdown_tx, worker_shutdown_rx) = tokio::sync::oneshot::channel();
    let worker_handle = worker::spawn(
        worker::WorkerDeps {
            source,
            metrics_repo: metrics_repo.clone(),
            shutdown_rx: worker_shutdown_rx,
        },
        worker::WorkerConfig {
            collection_interval_secs: app_config.intervals.collection_secs,
            stats_log_interval_secs: 3600,
        },
    );

    let (pipeline_shutdown_tx, pipeline_shutdown_rx) = tokio::sync::oneshot::channel();
    let pipeline_handle = aggregation_worker::spawn(
        metrics_repo.clone(),
        client,
        pipeline_config,
        pipeline_shutdown_rx,
    );

    let api_handle = if app_config.api.enabled {
        let addr = format!("{}:{}", app_config.api.host, app_config.api.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("Reporting API on http://{}", addr);
        let app = routes::app(metrics_repo.clone());
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::warn!(error = %e, "reporting API stopped");
            }
        }))
    } else {
        None
    };

    shutdown_signal().await;
    tracing::info!("Shutting down...");
    let _ = worker_shutdown_tx.send(());
    let _ = pipeline_shutdown_tx.send(());
    let _ = worker_handle.await;
    let _ = pipeline_handle.await;
    if let Some(handle) = api_handle {
        handle.abort();
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
