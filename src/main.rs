use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use pipe_adapters::Catalog;
use pipeflow_rust::config::{AppConfig, ENV_LOG};
use pipeflow_rust::{build_state, server};

#[derive(Parser)]
#[command(name = "pipeflow-server", version, about = "Servidor HTTP de pipelines de procesos externos")]
struct Cli {
    /// Dirección de escucha (sustituye PIPEFLOW_HOST)
    #[arg(long, short = 'H')]
    host: Option<String>,

    /// Puerto (sustituye PIPEFLOW_PORT)
    #[arg(long, short = 'p')]
    port: Option<u16>,

    /// Catálogo JSON de pipelines (sustituye PIPEFLOW_CATALOG)
    #[arg(long, short = 'c')]
    catalog: Option<PathBuf>,

    /// Directorio de trabajo (sustituye PIPEFLOW_WORK_DIR)
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Conserva los directorios de cada run
    #[arg(long)]
    retain_runs: bool,
}

fn init_logging() {
    let filter = std::env::var(ENV_LOG).or_else(|_| std::env::var("RUST_LOG"))
                                       .unwrap_or_else(|_| "info,tower_http=info".to_string());
    tracing_subscriber::fmt().with_target(false)
                             .with_thread_ids(false)
                             .with_level(true)
                             .compact()
                             .with_env_filter(filter)
                             .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut cfg = AppConfig::from_env().context("invalid PIPEFLOW_* configuration")?;
    init_logging();

    if let Some(host) = cli.host {
        cfg.host = host;
    }
    if let Some(port) = cli.port {
        cfg.port = port;
    }
    if let Some(catalog) = cli.catalog {
        cfg.catalog = catalog;
    }
    if let Some(dir) = cli.work_dir {
        cfg.work_dir = dir;
    }
    cfg.retain_runs |= cli.retain_runs;

    let catalog = Catalog::load(&cfg.catalog).with_context(|| format!("loading catalog {}", cfg.catalog.display()))?;
    if catalog.get(&cfg.default_pipeline).is_none() {
        tracing::warn!(pipeline = %cfg.default_pipeline, "default pipeline is not in the catalog; /generate will answer 404");
    }
    tokio::fs::create_dir_all(&cfg.work_dir).await
                                           .with_context(|| format!("creating work dir {}", cfg.work_dir.display()))?;

    let app = server::router(build_state(&cfg, catalog));
    let listener = tokio::net::TcpListener::bind(cfg.bind_addr()).await
                                                                 .with_context(|| format!("binding {}", cfg.bind_addr()))?;
    tracing::info!(addr = %cfg.bind_addr(),
                   work_dir = %cfg.work_dir.display(),
                   timeout_secs = cfg.request_timeout.as_secs(),
                   "pipeflow listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal())
                              .await
                              .context("server error")?;
    tracing::info!("pipeflow stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("cannot install Ctrl+C handler: {e}");
        std::future::pending::<()>().await;
    }
}
