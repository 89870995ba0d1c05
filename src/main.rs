use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use cnpj_batch::{app_state::AppState, config::AppConfig, db, routes};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!(
        cache_path = %config.cache_path,
        cache_ttl_seconds = config.cache_ttl_seconds,
        api_base_url = %config.api_base_url,
        min_delay_seconds = config.min_delay_seconds,
        "Initializing cnpj-batch server"
    );

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    metrics::describe_counter!("cnpj_lookups_total", "CNPJ lookups by outcome");
    metrics::describe_counter!("cnpj_cache_hits_total", "Lookups answered from the local cache");
    metrics::describe_histogram!("cnpj_lookup_seconds", "Time spent querying the lookup API");
    metrics::describe_counter!("batch_jobs_submitted_total", "Total batch jobs submitted");
    metrics::describe_counter!("batch_jobs_finished_total", "Batch jobs finished, by final status");

    // Open the lookup cache
    tracing::info!("Opening SQLite lookup cache");
    let db_pool = db::init_pool(&config.cache_path)
        .await
        .expect("Failed to open cache database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let state = AppState::from_config(db_pool, &config).expect("Failed to initialize application state");

    let app = routes::router(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_upload_bytes));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
