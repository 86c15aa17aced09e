use anyhow::{Context, Result};
use post_service::api::{start_api_server, AppState};
use post_service::auth::JwtVerifier;
use post_service::blob_store::S3BlobStore;
use post_service::config::Config;
use post_service::geo_search::GeoSearch;
use post_service::ingestion::{IngestionTargets, PostIngestion};
use post_service::record_store::{PgRecordStore, LOCATION_FAMILY, POST_FAMILY};
use post_service::search_index::{ElasticsearchIndex, IndexMapping, SearchIndex};
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Around post service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let record_store = Arc::new(
        PgRecordStore::new(&config.database)
            .await
            .context("Failed to initialize record store")?,
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        record_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    record_store
        .ensure_table(&config.database.table, &[POST_FAMILY, LOCATION_FAMILY])
        .await
        .context("Failed to declare record column families")?;

    let search_index = Arc::new(
        ElasticsearchIndex::new(&config.search).context("Failed to initialize search index")?,
    );

    // Startup halts if the index cannot be provisioned
    search_index
        .ensure_index(&config.search.index, &IndexMapping::posts())
        .await
        .context("Failed to provision search index")?;

    let blob_store = Arc::new(S3BlobStore::new(&config.s3).await);

    let ingestion = PostIngestion::new(
        blob_store,
        search_index.clone(),
        record_store.clone(),
        IngestionTargets {
            bucket: config.s3.bucket.clone(),
            index: config.search.index.clone(),
            table: config.database.table.clone(),
        },
    );
    let geo_search = GeoSearch::new(search_index.clone(), config.search.index.clone());

    let api_state = AppState {
        ingestion: Arc::new(ingestion),
        geo_search: Arc::new(geo_search),
        verifier: Arc::new(JwtVerifier::new(&config.auth)),
        search_index,
        record_store,
        default_radius: config.search.default_radius()?,
        coordinate_parsing: config.api.coordinate_parsing(),
    };

    info!("Post service started successfully");

    start_api_server(api_state, &config.api, shutdown_signal()).await?;

    info!("Post service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
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
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Shutting down post service");
}
