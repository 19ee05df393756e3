//! `bronte-proxy` binary entrypoint.

use bronte_proxy::{serve, AdapterConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Respect `RUST_LOG` if set; otherwise default to proxy-friendly info.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = AdapterConfig::from_env();
    if config.providers.is_empty() {
        tracing::warn!("no provider API keys found; only passthrough will work");
    }
    serve(config).await
}
