use branchline::{config::AppConfig, context::AppContext, error::ServiceResult, server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> ServiceResult<()> {
    let config = AppConfig::from_env()?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate()?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting branchline");

    let ctx = AppContext::new(config).await?;
    server::serve(ctx).await
}
