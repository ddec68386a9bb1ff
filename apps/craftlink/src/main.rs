//! Craftlink entry point.

mod app;
mod config;
mod listener;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let config = config::Config::load()?;

    let default_filter = if config.debug {
        "info,craftlink=debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        path = %config::config_path().display(),
        "starting craftlink"
    );

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            tracing::error!("config: {e}");
        }
        anyhow::bail!("invalid configuration ({} problems)", errors.len());
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("craftlink shut down cleanly");
    Ok(())
}
