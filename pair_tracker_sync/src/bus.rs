use pair_tracker_lib::comms::WorkerMessage;
use tokio::sync::broadcast;

/// In-process fan-out channel connecting the two execution contexts.
///
/// Delivery is fire-and-forget: publishing with no live subscriber is not an
/// error, and a subscriber that falls behind skips ahead instead of stalling
/// the publisher.
#[derive(Clone)]
pub struct MessageBus {
    tx: broadcast::Sender<WorkerMessage>,
}

impl MessageBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(100);
        Self { tx }
    }

    pub fn publish(&self, message: WorkerMessage) {
        let _ = self.tx.send(message);
    }

    pub fn subscribe(&self) -> BusSubscription {
        BusSubscription {
            rx: self.tx.subscribe(),
        }
    }
}

pub struct BusSubscription {
    rx: broadcast::Receiver<WorkerMessage>,
}

impl BusSubscription {
    /// Next message, or `None` once every publisher is gone.
    pub async fn recv(&mut self) -> Option<WorkerMessage> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Bus subscriber lagged, skipped {} messages", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[tokio::test]
async fn publish_reaches_every_subscriber() {
    let bus = MessageBus::new();
    let mut first = bus.subscribe();
    let mut second = bus.subscribe();

    bus.publish(WorkerMessage::StopTracking);

    assert_eq!(first.recv().await, Some(WorkerMessage::StopTracking));
    assert_eq!(second.recv().await, Some(WorkerMessage::StopTracking));
}

#[tokio::test]
async fn publish_without_subscribers_is_dropped_silently() {
    let bus = MessageBus::new();
    bus.publish(WorkerMessage::RequestLocation);

    let mut late = bus.subscribe();
    bus.publish(WorkerMessage::StopTracking);

    // The subscriber only sees messages published after it attached.
    assert_eq!(late.recv().await, Some(WorkerMessage::StopTracking));
}

#[tokio::test]
async fn lagged_subscriber_skips_ahead() {
    let bus = MessageBus::new();
    let mut slow = bus.subscribe();

    for _ in 0..150 {
        bus.publish(WorkerMessage::RequestLocation);
    }

    // The channel only retains the newest messages, but the subscriber still
    // gets one rather than an error.
    assert_eq!(slow.recv().await, Some(WorkerMessage::RequestLocation));
}
