//! wallpaperdb-ingest entry point.

use tracing_subscriber::EnvFilter;

use wallpaperdb_core::Config;
use wallpaperdb_ingest::App;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    config.validate()?;

    let app = App::build(config).await?;
    app.run_until_shutdown().await
}
