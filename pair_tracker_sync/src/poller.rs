use std::{sync::Arc, time::Duration};

use pair_tracker_lib::{location_sample::LocationSample, partner::PartnerState};
use tokio::{sync::watch, task::JoinHandle, time::interval};

use crate::{
    platform::{GeoOptions, Platform},
    remote::SyncApi,
};

/// Foreground refresh loop: pushes our own position and pulls the partner's
/// on a short period while the app is in front. Runs independently of the
/// background worker, which covers the long gaps.
pub struct LocationPoller {
    handle: JoinHandle<()>,
    partner: watch::Receiver<Option<PartnerState>>,
}

impl LocationPoller {
    pub fn spawn(platform: Platform, remote: Arc<dyn SyncApi>, period: Duration) -> Self {
        let (partner_tx, partner_rx) = watch::channel(None);

        let handle = tokio::spawn(async move {
            tracing::debug!("Foreground poller running");
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                round(&platform, remote.as_ref(), &partner_tx).await;
            }
        });

        Self {
            handle,
            partner: partner_rx,
        }
    }

    /// Watch channel carrying the partner's latest known state.
    pub fn partner_updates(&self) -> watch::Receiver<Option<PartnerState>> {
        self.partner.clone()
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

/// One foreground round. A failed push only costs this round; the partner
/// fetch runs regardless so the view stays fresh.
async fn round(
    platform: &Platform,
    remote: &dyn SyncApi,
    partner_tx: &watch::Sender<Option<PartnerState>>,
) {
    match platform.read_position(GeoOptions::sample()).await {
        Ok(fix) => {
            let sample = LocationSample {
                position: fix.position,
                accuracy: fix.accuracy,
                battery_level: platform.read_battery().await,
                timestamp: fix.timestamp,
            };
            if let Err(err) = remote.push_location(&sample).await {
                tracing::debug!("Foreground push failed: {:?}", err);
            }
        }
        Err(err) => {
            tracing::debug!("Foreground position read failed: {:?}", err);
        }
    }

    match remote.fetch_partner().await {
        Ok(partner) => {
            let _ = partner_tx.send(partner);
        }
        Err(err) => {
            tracing::debug!("Partner fetch failed: {:?}", err);
        }
    }
}

#[tokio::test]
async fn poller_pushes_and_refreshes_the_partner() {
    use crate::testing;

    let remote = testing::FakeRemote::new();
    remote.set_partner(pair_tracker_lib::partner::PartnerState::new(
        "Alex".to_string(),
        55.6761,
        12.5683,
        Some(90),
        chrono::Utc::now(),
    ));

    let geo = testing::ScriptedGeo::granted(56.1629, 10.2039);
    let poller = LocationPoller::spawn(
        Platform::new(geo),
        remote.clone(),
        Duration::from_millis(20),
    );

    let mut partner = poller.partner_updates();
    tokio::time::timeout(Duration::from_secs(2), partner.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(partner.borrow().as_ref().unwrap().name, "Alex");

    testing::await_until("foreground push", || remote.push_count() >= 1).await;
    let pushed = remote.pushes.lock().unwrap()[0];
    assert_eq!(pushed.latitude(), 56.1629);
    assert_eq!(pushed.longitude(), 10.2039);

    poller.stop();
}

#[tokio::test]
async fn push_failure_does_not_block_the_partner_fetch() {
    use crate::testing;

    let remote = testing::FakeRemote::new();
    remote.fail_pushes();
    remote.set_partner(pair_tracker_lib::partner::PartnerState::new(
        "Alex".to_string(),
        55.6761,
        12.5683,
        None,
        chrono::Utc::now(),
    ));

    let geo = testing::ScriptedGeo::granted(56.1629, 10.2039);
    let poller = LocationPoller::spawn(
        Platform::new(geo),
        remote.clone(),
        Duration::from_millis(20),
    );

    let mut partner = poller.partner_updates();
    tokio::time::timeout(Duration::from_secs(2), partner.changed())
        .await
        .unwrap()
        .unwrap();
    assert!(partner.borrow().is_some());
    assert_eq!(remote.push_count(), 0);
    assert!(remote.partner_fetch_count() >= 1);

    poller.stop();
}

#[tokio::test]
async fn read_failure_still_fetches_the_partner() {
    use crate::testing;

    let remote = testing::FakeRemote::new();
    let poller = LocationPoller::spawn(
        Platform::new(testing::ScriptedGeo::denied()),
        remote.clone(),
        Duration::from_millis(20),
    );

    testing::await_until("partner fetch", || remote.partner_fetch_count() >= 2).await;
    assert_eq!(remote.push_count(), 0);

    poller.stop();
}
