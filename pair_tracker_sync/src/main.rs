use std::sync::Arc;

use pair_tracker_sync::{
    bridge,
    bus::MessageBus,
    config::SyncConfig,
    controller::TrackingController,
    mirror::SettingsMirror,
    permissions::PermissionManager,
    platform::{FixedPositionSource, Platform, StaticBattery},
    poller::LocationPoller,
    remote::SyncClient,
    worker::WorkerHost,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=trace", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting sync daemon...");

    let config = match SyncConfig::load() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("Invalid configuration: {:?}", err);
            std::process::exit(1);
        }
    };

    let remote = Arc::new(SyncClient::new(&config.api_url, &config.api_token));

    let mut platform = Platform::new(Arc::new(FixedPositionSource::new(
        config.latitude,
        config.longitude,
        25.0,
    )));
    if let Some(level) = config.battery_level {
        platform = platform.with_battery(Arc::new(StaticBattery(level)));
    }

    let bus = MessageBus::new();
    let host = WorkerHost::with_sample_interval(
        bus.clone(),
        remote.clone(),
        None,
        config.sample_interval,
    );
    let permissions = PermissionManager::new(platform.clone(), host.clone());
    let controller = TrackingController::new(
        host.clone(),
        permissions,
        remote.clone(),
        SettingsMirror::open_default(),
    );

    let bridge = bridge::attach(&bus, platform.clone());
    let poller = LocationPoller::spawn(platform, remote, config.push_interval);

    let mut partner = poller.partner_updates();
    tokio::spawn(async move {
        while partner.changed().await.is_ok() {
            let latest = partner.borrow_and_update().clone();
            if let Some(partner) = latest {
                tracing::info!(
                    "Partner {} seen at {:.4}, {:.4}",
                    partner.name,
                    partner.latitude,
                    partner.longitude
                );
            }
        }
    });

    if let Err(err) = bring_up(&controller).await {
        tracing::error!("Failed to bring up background tracking: {err:?}");
    }

    tokio::signal::ctrl_c().await.unwrap();
    tracing::info!("Shutting down...");

    poller.stop();
    bridge.detach();
    // Stop the local worker without flipping the remote preference, so
    // tracking comes back on the next start.
    host.unregister().await;
}

/// Resume from the last known state, or enable tracking on a first run.
async fn bring_up(controller: &TrackingController) -> Result<(), anyhow::Error> {
    let session = controller.resume().await;
    if !session.active {
        controller
            .enable_background_tracking(false)
            .await
            .map_err(|err| anyhow::anyhow!("Could not enable background tracking: {:?}", err))?;
    }
    Ok(())
}
