use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::AppState;
use tosse_core::{
    config::{max_history_from_env_value, stage_delays_from_env_value},
    CoreConfig, ResultStore, StubAnalyzer, DEFAULT_DATA_DIR,
};

/// Main entry point for the TOSSE service
///
/// Opens the history store and serves the REST API.
///
/// # Environment Variables
/// - `TOSSE_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `TOSSE_DATA_DIR`: Directory holding the history file (default: "tosse_data")
/// - `TOSSE_MAX_HISTORY`: Optional cap on stored records, oldest evicted first
/// - `TOSSE_STAGE_DELAYS_MS`: Three comma-separated stage delays in milliseconds
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tosse_run=info".parse()?)
                .add_directive("tosse_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("TOSSE_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let data_dir = std::env::var("TOSSE_DATA_DIR").unwrap_or_else(|_| DEFAULT_DATA_DIR.into());
    let cfg = CoreConfig::new(
        PathBuf::from(data_dir),
        stage_delays_from_env_value(std::env::var("TOSSE_STAGE_DELAYS_MS").ok())?,
        max_history_from_env_value(std::env::var("TOSSE_MAX_HISTORY").ok())?,
    )?;

    let store = ResultStore::open(&cfg);
    tracing::info!(
        "++ Loaded {} history records from {}",
        store.len(),
        store.path().display()
    );

    let state = AppState::new(store, Arc::new(StubAnalyzer::from_config(&cfg)));

    tracing::info!("++ Starting TOSSE REST on {}", rest_addr);
    api_rest::serve(&rest_addr, state).await
}
