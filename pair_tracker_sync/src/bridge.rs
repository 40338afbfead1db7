use chrono::{DateTime, Utc};
use pair_tracker_lib::{comms::WorkerMessage, location_sample::LocationSample};
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    bus::MessageBus,
    platform::{GeoOptions, Platform},
};

/// What the foreground knows about the background timer, fed by the started
/// and stopped events on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackingNotice {
    pub tracking: bool,
    pub since: Option<DateTime<Utc>>,
}

/// Running foreground bridge. Dropping the handle leaves the task running;
/// call [`BridgeHandle::detach`] to end it.
pub struct BridgeHandle {
    handle: JoinHandle<()>,
    notices: watch::Receiver<TrackingNotice>,
}

impl BridgeHandle {
    pub fn notices(&self) -> watch::Receiver<TrackingNotice> {
        self.notices.clone()
    }

    pub fn detach(self) {
        self.handle.abort();
    }
}

/// Attach the foreground side of the bus: sample requests from the worker
/// are fulfilled with platform reads, and tracking events are mirrored into
/// a watch channel for the UI.
pub fn attach(bus: &MessageBus, platform: Platform) -> BridgeHandle {
    let (notice_tx, notice_rx) = watch::channel(TrackingNotice::default());
    let mut subscription = bus.subscribe();
    let bus = bus.clone();

    let handle = tokio::spawn(async move {
        tracing::debug!("Foreground bridge attached");
        while let Some(message) = subscription.recv().await {
            match message {
                WorkerMessage::RequestLocation => {
                    fulfil_request(&bus, &platform).await;
                }
                WorkerMessage::TrackingStarted { timestamp } => {
                    let _ = notice_tx.send(TrackingNotice {
                        tracking: true,
                        since: Some(timestamp),
                    });
                }
                WorkerMessage::TrackingStopped { .. } => {
                    let _ = notice_tx.send(TrackingNotice {
                        tracking: false,
                        since: None,
                    });
                }
                _ => {}
            }
        }
        tracing::debug!("Foreground bridge detached");
    });

    BridgeHandle {
        handle,
        notices: notice_rx,
    }
}

/// Read position and battery, then hand the sample back over the bus. A
/// failed read loses this cycle; the next timer tick tries again.
async fn fulfil_request(bus: &MessageBus, platform: &Platform) {
    let fix = match platform.read_position(GeoOptions::sample()).await {
        Ok(fix) => fix,
        Err(err) => {
            tracing::warn!("Sample cycle lost, position read failed: {:?}", err);
            return;
        }
    };

    let sample = LocationSample {
        position: fix.position,
        accuracy: fix.accuracy,
        battery_level: platform.read_battery().await,
        timestamp: fix.timestamp,
    };
    bus.publish(WorkerMessage::location_update(&sample));
}

#[tokio::test]
async fn request_is_fulfilled_with_a_platform_reading() {
    use crate::platform::StaticBattery;
    use std::sync::Arc;

    let bus = MessageBus::new();
    let geo = crate::testing::ScriptedGeo::granted(55.6761, 12.5683);
    let platform = Platform::new(geo.clone()).with_battery(Arc::new(StaticBattery(42)));
    let bridge = attach(&bus, platform);

    let mut observer = bus.subscribe();
    bus.publish(WorkerMessage::RequestLocation);

    let update = crate::testing::await_message(&mut observer, |message| {
        matches!(message, WorkerMessage::LocationUpdate { .. })
    })
    .await;

    let WorkerMessage::LocationUpdate {
        position,
        battery_level,
        ..
    } = update
    else {
        unreachable!();
    };
    assert_eq!(position.latitude, 55.6761);
    assert_eq!(position.longitude, 12.5683);
    assert_eq!(battery_level, Some(42));

    bridge.detach();
}

#[tokio::test]
async fn failed_read_loses_only_that_cycle() {
    use crate::platform::GeoError;

    let bus = MessageBus::new();
    let geo = crate::testing::ScriptedGeo::granted(55.6761, 12.5683);
    geo.queue_failure(GeoError::Unavailable("no fix yet".to_string()));
    let bridge = attach(&bus, Platform::new(geo.clone()));

    let mut observer = bus.subscribe();
    bus.publish(WorkerMessage::RequestLocation);
    bus.publish(WorkerMessage::RequestLocation);

    crate::testing::await_message(&mut observer, |message| {
        matches!(message, WorkerMessage::LocationUpdate { .. })
    })
    .await;
    assert_eq!(geo.read_count(), 2);

    // Only the second cycle produced a sample.
    let extra = tokio::time::timeout(std::time::Duration::from_millis(80), async {
        crate::testing::await_message(&mut observer, |message| {
            matches!(message, WorkerMessage::LocationUpdate { .. })
        })
        .await
    })
    .await;
    assert!(extra.is_err());

    bridge.detach();
}

#[tokio::test]
async fn tracking_events_update_the_notice_watch() {
    let bus = MessageBus::new();
    let geo = crate::testing::ScriptedGeo::granted(55.6761, 12.5683);
    let bridge = attach(&bus, Platform::new(geo));
    let mut notices = bridge.notices();

    assert_eq!(*notices.borrow(), TrackingNotice::default());

    let started_at = Utc::now();
    bus.publish(WorkerMessage::TrackingStarted {
        timestamp: started_at,
    });
    tokio::time::timeout(std::time::Duration::from_secs(2), notices.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        *notices.borrow(),
        TrackingNotice {
            tracking: true,
            since: Some(started_at),
        }
    );

    bus.publish(WorkerMessage::TrackingStopped {
        timestamp: Utc::now(),
    });
    tokio::time::timeout(std::time::Duration::from_secs(2), notices.changed())
        .await
        .unwrap()
        .unwrap();
    assert!(!notices.borrow().tracking);

    bridge.detach();
}
