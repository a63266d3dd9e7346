//! bookfeed-server entry point.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use bookfeed_core::init_tracing;
use bookfeed_server::cli::Cli;
use bookfeed_server::{AppState, FeedService, ServerResult, Shutdown, build_router, serve};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.tracing_config()) {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ServerResult<()> {
    let config = cli.server_config();

    // 1. Configuration provider; the booking config is re-read per request,
    //    this load only reports its state.
    let provider = config.config_provider()?;
    match provider.load().await {
        Ok(Some(booking)) => {
            info!(
                provider = provider.name(),
                complete = booking.completeness().is_complete(),
                "Booking configuration found"
            );
        }
        Ok(None) => {
            warn!(provider = provider.name(), "No booking configuration yet, feed returns 503");
        }
        Err(e) => {
            warn!(provider = provider.name(), error = %e, "Could not load booking configuration");
        }
    }

    // 2. Page fetcher, chosen per request from the booking config
    let selector = config.fetcher_selector();
    info!(
        config = provider.name(),
        timeout_secs = config.fetch_timeout.as_secs(),
        "Providers ready"
    );

    // 3. Feed service and router
    let feed = Arc::new(FeedService::selecting(provider, selector));
    let router = build_router(AppState::new(feed));

    // 4. Signal handler
    let shutdown = Shutdown::new();
    shutdown.spawn_listener();

    // 5. Serve
    let listener = TcpListener::bind(config.listen).await?;
    serve(listener, router, shutdown.wait()).await?;
    Ok(())
}
