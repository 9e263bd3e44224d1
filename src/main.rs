use clamav_scan_api::config::ScanConfig;
use clamav_scan_api::infrastructure::scanner;
use clamav_scan_api::services::cleanup::spawn_cleanup_scheduler;
use clamav_scan_api::services::downloader::DownloadGuard;
use clamav_scan_api::services::job_registry::JobRegistry;
use clamav_scan_api::services::queue::WorkQueue;
use clamav_scan_api::services::scan_processing::ScanOrchestrator;
use clamav_scan_api::services::worker::WorkerPool;
use clamav_scan_api::{AppState, create_app};
use clap::Parser;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Malware scanning API backed by ClamAV")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    // Initialize tracing with EnvFilter
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clamav_scan_api=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting ClamAV Scan API...");

    let config = ScanConfig::from_env();
    info!(
        "🛡️  Scan Config: Max Size={}MB, Scanner={} ({}:{}), Workers={}, Queue={}",
        config.max_file_size / 1024 / 1024,
        config.virus_scanner_type,
        config.clamav_host,
        config.clamav_port,
        config.worker_count,
        config.queue_capacity
    );

    tokio::fs::create_dir_all(&config.temp_dir).await?;

    let scanner_service = scanner::setup_scanner(&config).await;
    let jobs = Arc::new(JobRegistry::new());
    let queue = Arc::new(WorkQueue::new(config.queue_capacity));
    let downloader = DownloadGuard::new(
        config.max_file_size,
        config.download_timeout,
        config.max_redirects,
    )?;
    let orchestrator = Arc::new(ScanOrchestrator::new(
        jobs.clone(),
        scanner_service.clone(),
        queue.clone(),
        downloader,
        &config,
    ));

    // Background processing shares one shutdown token
    let shutdown = CancellationToken::new();
    let pool = WorkerPool::start(queue.clone(), config.worker_count, shutdown.clone());
    let cleanup = spawn_cleanup_scheduler(
        queue,
        jobs.clone(),
        config.job_retention,
        config.cleanup_initial_delay,
        config.cleanup_interval,
        shutdown.clone(),
    );

    let state = AppState {
        jobs,
        scanner: scanner_service,
        orchestrator,
        config,
    };

    let app = create_app(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            })
            .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                info!("📥 {} {}", request.method(), request.uri());
            })
            .on_response(
                |response: &axum::http::Response<_>,
                 latency: std::time::Duration,
                 _span: &tracing::Span| {
                    info!(
                        "📤 Finished in {:?} with status {}",
                        latency,
                        response.status()
                    );
                },
            ),
    );

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    info!("✅ Server ready at http://{}", addr);
    info!("📖 Swagger UI: http://{}/swagger-ui", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // HTTP has drained; stop background work and wait for in-flight jobs
    shutdown.cancel();
    if let Err(e) = cleanup.await {
        tracing::error!("Cleanup scheduler failed to join: {}", e);
    }
    pool.shutdown().await;

    info!("🛑 Server shut down gracefully.");
    Ok(())
}

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
            Ok(mut sig) => {
                sig.recv().await;
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
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}
