//! deepslide - a Deep Zoom tile server for local slide images.
//!
//! This binary starts the HTTP server and configures all components.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deepslide::{
    config::Config,
    server::{create_router, AppState, RouterConfig},
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    // Serve from the canonical root so containment checks are stable even
    // when the configured path is relative.
    let root = match config.root.canonicalize() {
        Ok(root) => root,
        Err(e) => {
            error!("Cannot canonicalize root {}: {}", config.root.display(), e);
            return ExitCode::FAILURE;
        }
    };

    info!("Configuration:");
    info!("  Root: {}", root.display());
    info!(
        "  Tiles: {}x{} +{} overlap, {} q{}",
        config.tile_size, config.tile_size, config.overlap, config.tile_format, config.tile_quality
    );
    info!("  Cache: {} open slides", config.cache_slides);
    info!("  Listing depth: {}", config.folder_depth);

    let state = AppState::new(
        root,
        config.cache_slides,
        config.tiling_options(),
        config.parsed_tile_format(),
        config.tile_quality,
    )
    .with_cache_max_age(config.cache_max_age)
    .with_folder_depth(config.folder_depth);

    let router_config = build_router_config(&config);
    let router = create_router(state, router_config);

    let addr = config.bind_address();
    info!("Server listening on http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "deepslide=debug,tower_http=debug"
    } else {
        "deepslide=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application Config.
fn build_router_config(config: &Config) -> RouterConfig {
    let mut router_config = RouterConfig::new().with_tracing(!config.no_tracing);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config
}
