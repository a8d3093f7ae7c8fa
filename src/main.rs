//! AIS to Cursor on Target gateway

use ais_cot::{
    cache::IdentityCacheBuilder,
    config::AppConfig,
    coordinator::{Coordinator, Pipeline},
    errors::GatewayError,
    known_craft::KnownCraftMatcher,
    synthesizer::EventSynthesizer,
    transport::UdpSink,
};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), GatewayError> {
    #[cfg(feature = "dotenv")]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load configuration, preferring environment variables and config files
    let config = AppConfig::load()?;
    config.validate()?;

    // A malformed table stops startup; never run with half the rules.
    let matcher = match &config.known_craft.path {
        Some(path) => KnownCraftMatcher::from_path(path, config.known_craft.explicit_only)
            .inspect_err(|e| error!("Known craft table rejected: {}", e))?,
        None => KnownCraftMatcher::default(),
    };

    let pipeline = Pipeline::new(matcher, EventSynthesizer::new(&config.cot));
    let sink = UdpSink::bind(config.transport.cot_addr).await?;

    let mut coordinator =
        Coordinator::new(pipeline, sink).with_shutdown_grace(config.intake.shutdown_grace);
    if let Some(path) = &config.cache.path {
        let cache = IdentityCacheBuilder::new()
            .path(path.clone())
            .flush_interval(config.cache.flush_interval)
            .build();
        coordinator = coordinator.with_cache(cache);
    }

    // Setup signal handling for graceful shutdown
    let shutdown_signal = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal");
    };

    coordinator.run(&config, shutdown_signal).await
}
