//! parley server binary.
//!
//! Reads `config.toml` (or the path given with `--config`) plus `PARLEY_*`
//! environment variables, opens the SQLite store, starts the reconciliation
//! sweep, and serves the JSON API over HTTP.
//!
//! Nested keys use a double underscore in the environment, e.g.
//! `PARLEY_ENGINE__POLL_INTERVAL_MS=1000`.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use clap::Parser;
use parley_api::{AppState, ServerConfig};
use parley_engine::{
  Engine,
  upstream::{HttpRecommender, HttpSummarizer},
};
use parley_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Parley matchmaking server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("PARLEY").separator("__"))
    .build()
    .context("failed to read configuration")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  let store_path = expand_tilde(&server_cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let timeout = server_cfg.engine.upstream_timeout();
  if server_cfg.recommender_url.is_none() {
    tracing::warn!("no recommender_url configured; searches use the fallback list");
  }
  if server_cfg.summarizer_url.is_none() {
    tracing::warn!("no summarizer_url configured; sessions end without summaries");
  }
  let recommender = HttpRecommender::new(server_cfg.recommender_url.clone(), timeout)
    .context("failed to build recommender client")?;
  let summarizer = HttpSummarizer::new(server_cfg.summarizer_url.clone(), timeout)
    .context("failed to build summarizer client")?;

  let engine = Engine::new(Arc::new(store), recommender, summarizer, server_cfg.engine.clone());
  engine.sweeper().spawn();

  let state = AppState { engine: Arc::new(engine) };
  let app = parley_api::router(state).layer(TraceLayer::new_for_http());
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// Expand a leading `~` component to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  match (path.strip_prefix("~"), std::env::var_os("HOME")) {
    (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
    _ => path.to_path_buf(),
  }
}
