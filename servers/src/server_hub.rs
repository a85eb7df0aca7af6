//! # Feed Notification Hub Server
//!
//! WebSocket server that pushes Last.fm "recent track" changes to subscribed
//! clients.
//!
//! ## Functionality:
//! - **WebSocket endpoint** on `/` and `/ws`, health check on `/health`,
//!   optional TLS through rustls.
//! - **Subscription engine** from `lib_hub`: connection registry, heartbeat
//!   monitor, feed index and event bus.
//! - **Poll scheduler** that refreshes every subscribed feed on a fixed
//!   interval and pushes only changed snapshots.
//! - **Logging** with `tracing`: console plus daily rotating JSON files.
//! - **Graceful shutdown** with `tokio-graceful`: clients receive a close
//!   frame before the process exits.
//! - **Layered configuration**: defaults, `server_hub.conf`, environment and
//!   CLI flags (see `hub_logic::config`).

mod hub_logic;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_graceful::{Shutdown, ShutdownGuard};
use tracing::{error, info};

use lib_hub::provider::LastFmProvider;
use lib_hub::{ChannelTransport, Hub, MessageRouter, PollScheduler};

use hub_logic::config::{load_config, ServerConfig};
use hub_logic::downstream::{self, AppState};
use hub_logic::logger::setup_logging;

fn load_env() {
    let dotenv_os: &str = if cfg!(target_os = "windows") {
        ".env.windows"
    } else {
        ".env.linux"
    };
    dotenvy::dotenv().ok();
    dotenvy::from_filename(dotenv_os).ok();
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();

    let config = load_config().context("Failed to load configuration")?;
    let _guard = setup_logging(&config.log_dir, &config.log_level)?;

    match &config.config_file {
        Some(path) => info!("Loaded config file {}", path.display()),
        None => info!("No config file found. Using defaults and environment/CLI variables."),
    }
    info!(
        "Hub settings: ping {:?} (+{:?} grace), poll {:?}",
        config.hub.ping_interval, config.hub.ping_grace, config.hub.poll_interval
    );

    if config.tls.is_some() {
        rustls::crypto::ring::default_provider()
            .install_default()
            .map_err(|_| anyhow::anyhow!("Failed to install the rustls crypto provider"))?;
    }

    let provider = LastFmProvider::new(
        &config.provider_url,
        &config.provider_api_key,
        config.provider_timeout,
    )
    .context("Failed to build the Last.fm provider")?;

    let transport = Arc::new(ChannelTransport::new());
    let hub = Hub::new(config.hub.clone(), transport.clone());
    let scheduler = Arc::new(PollScheduler::new(hub.clone(), Arc::new(provider)));
    let state = AppState {
        router: MessageRouter::new(hub.clone()),
        transport,
    };

    let shutdown: Shutdown = Shutdown::default();

    shutdown.spawn_task_fn(move |guard: ShutdownGuard| async move {
        scheduler.run(guard.cancelled()).await;
    });

    shutdown.spawn_task_fn(move |guard: ShutdownGuard| async move {
        if let Err(e) = serve(config, state, guard).await {
            error!("Downstream server stopped: {:#}", e);
        }
    });

    match shutdown.shutdown_with_limit(Duration::from_secs(10)).await {
        Ok(elapsed) => {
            info!(
                "shutdown: gracefully {}s after shutdown signal received",
                elapsed.as_secs_f64()
            );
        }
        Err(e) => {
            info!("shutdown: forcefully due to timeout: {}", e);
        }
    }

    hub.shutdown();
    info!("Bye!");

    Ok(())
}

async fn serve(config: ServerConfig, state: AppState, guard: ShutdownGuard) -> Result<()> {
    let signal = guard.clone();
    downstream::run(&config, state, async move {
        signal.cancelled().await;
    })
    .await
}
