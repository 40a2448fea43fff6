//! `washday-server`: runs a Washday server configured from the environment.
//!
//! Set `RUST_LOG` to change log verbosity (defaults to `info`).

use tracing_subscriber::EnvFilter;
use washday::prelude::*;

#[tokio::main]
async fn main() -> Result<(), WashdayError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::from_env()?;
    match config.records.clone() {
        Some(path) => {
            tracing::info!(path = %path.display(), "recording finished sessions");
            serve(config, JsonLinesSink::new(path)).await
        }
        None => serve(config, TracingSink).await,
    }
}

async fn serve<S: PersistenceSink>(config: ServerConfig, sink: S) -> Result<(), WashdayError> {
    let server = WashdayServerBuilder::from_config(config).build(sink).await?;
    if let Ok(addr) = server.local_addr() {
        tracing::info!(%addr, "listening");
    }
    server.run().await
}
