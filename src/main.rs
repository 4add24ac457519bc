use heating_oil_level::{Coordinator, Settings};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting heating oil level monitor");
    let settings = Settings::from_env()?;

    let coordinator = Coordinator::setup(settings).await?;
    coordinator.run().await;

    Ok(())
}
