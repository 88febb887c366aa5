//! Helios FHIR Validator
//!
//! An HTTP service validating FHIR R4 resources against profiles.

use std::sync::Arc;

use clap::Parser;
use helios_validation::conformance::ConformanceEngineFactory;
use helios_validation::engine::{
    BASE_IMPLEMENTATION_GUIDE, CORE_PACKAGE, EngineProvider, TERMINOLOGY_SERVER,
};
use helios_validation::{ValidatorConfig, create_app_with_config, init_logging};
use tracing::info;

/// Starts the Axum HTTP server.
async fn serve(app: axum::Router, config: &ValidatorConfig) -> anyhow::Result<()> {
    let addr = config.socket_addr();
    info!(address = %addr, "Server listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ValidatorConfig::parse();
    init_logging(&config.log_level);

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        std::process::exit(1);
    }

    info!(
        port = config.port,
        host = %config.host,
        core_package = CORE_PACKAGE,
        implementation_guide = BASE_IMPLEMENTATION_GUIDE,
        terminology_server = TERMINOLOGY_SERVER,
        package_cache = %config.package_cache_dir().display(),
        "Starting Helios FHIR Validator"
    );

    let provider = EngineProvider::from_config(Arc::new(ConformanceEngineFactory::new()), &config);
    if config.preload_engine {
        info!("Pre-warming validation engine");
        // The warm-up task logs its own progress and runs until the engine is built.
        provider.warm_up();
    }

    let app = create_app_with_config(provider, config.clone());
    serve(app, &config).await
}
