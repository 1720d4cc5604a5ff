use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::PathBuf;
use std::sync::Arc;
use strata::backend::{
    BackendConnector, ClickhouseHttpConnector, ElasticsearchConnector, HttpElasticsearchConnector,
};
use strata::config::{Config, LoggingConfig};
use strata::resolver::TableResolver;
use strata::table::{StaticTableDiscovery, TableDiscovery};
use strata::QueryRunner;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "strata-server")]
#[command(about = "Elasticsearch-protocol query proxy for ClickHouse")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "STRATA_CONFIG", default_value = "strata.toml")]
    config: PathBuf,

    /// Address to bind to, overrides `server.bind_addr`
    #[arg(long)]
    bind: Option<String>,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},strata=debug", logging.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route("/metrics", get(move || async move { handle.render() }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load_or_default(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    init_tracing(&config.logging);

    let addr = args.bind.clone().unwrap_or_else(|| config.server.bind_addr.clone());
    tracing::info!("Starting strata server on {}", addr);
    tracing::info!("Config file: {}", args.config.display());

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("installing Prometheus recorder")?;

    let config = Arc::new(config);
    let discovery: Arc<dyn TableDiscovery> = Arc::new(StaticTableDiscovery::from_config(&config));
    let backend: Arc<dyn BackendConnector> =
        Arc::new(ClickhouseHttpConnector::new(&config.clickhouse)?);
    let elastic: Option<Arc<dyn ElasticsearchConnector>> = match &config.elasticsearch {
        Some(es) => {
            tracing::info!("Elasticsearch forwarding enabled: {}", es.url);
            Some(Arc::new(HttpElasticsearchConnector::new(es)?))
        }
        None => None,
    };

    let resolver = Arc::new(TableResolver::new(
        Arc::clone(&config),
        Arc::clone(&discovery),
        elastic.clone(),
    ));
    if let Err(e) = resolver.refresh().await {
        tracing::warn!("Initial table resolver refresh failed: {}", e);
    }
    let refresh_loop = {
        let resolver = Arc::clone(&resolver);
        tokio::spawn(async move { resolver.start().await })
    };

    let mut runner = QueryRunner::new(
        Arc::clone(&config),
        Arc::clone(&resolver),
        discovery,
        backend,
    );
    if let Some(elastic) = elastic {
        runner = runner.with_elastic(elastic);
    }

    let app = strata_es_compat::es_compat_router(runner.clone())
        .merge(metrics_router(prometheus))
        .layer(DefaultBodyLimit::max(config.server.max_body_size))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    runner.close();
    resolver.stop();
    if let Err(e) = refresh_loop.await {
        tracing::warn!("Table resolver task ended abnormally: {}", e);
    }
    tracing::info!("Server stopped");

    Ok(())
}
