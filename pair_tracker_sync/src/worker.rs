use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use pair_tracker_lib::{
    comms::{Position, TrackingStatus, WorkerMessage},
    location_sample::LocationSample,
};
use tokio::{
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
    time::{sleep_until, Instant},
};

use crate::{
    bus::{BusSubscription, MessageBus},
    platform::Notifier,
    remote::SyncApi,
    SyncError, WORKER_SAMPLE_INTERVAL,
};

/// Out-of-band control for a running worker. Queries need a reply channel,
/// so they bypass the fire-and-forget bus.
pub enum ControlMessage {
    GetStatus(oneshot::Sender<TrackingStatus>),
    Shutdown,
}

/// Lifecycle of the worker context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// No worker is registered.
    Uninstalled,
    /// Registered and listening, no sampling timer armed.
    Idle,
    /// Registered with the periodic sampling timer armed.
    Tracking,
}

/// Transition rules of the worker, kept apart from the task so they can be
/// tested without a runtime.
#[derive(Debug, Clone, Copy)]
pub struct WorkerStateMachine {
    state: WorkerState,
    show_notification: bool,
}

impl WorkerStateMachine {
    pub fn new() -> Self {
        Self {
            state: WorkerState::Uninstalled,
            show_notification: false,
        }
    }

    pub fn install(&mut self) {
        if self.state == WorkerState::Uninstalled {
            self.state = WorkerState::Idle;
        }
    }

    /// Returns whether this call armed the timer. Starting while already
    /// tracking only refreshes the notification setting.
    pub fn start_tracking(&mut self, show_notification: bool) -> bool {
        match self.state {
            WorkerState::Uninstalled => false,
            WorkerState::Idle => {
                self.state = WorkerState::Tracking;
                self.show_notification = show_notification;
                true
            }
            WorkerState::Tracking => {
                self.show_notification = show_notification;
                false
            }
        }
    }

    /// Returns whether a running timer was disarmed.
    pub fn stop_tracking(&mut self) -> bool {
        if self.state == WorkerState::Tracking {
            self.state = WorkerState::Idle;
            true
        } else {
            false
        }
    }

    pub fn set_show_notification(&mut self, show: bool) {
        if self.state != WorkerState::Uninstalled {
            self.show_notification = show;
        }
    }

    pub fn uninstall(&mut self) {
        self.state = WorkerState::Uninstalled;
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn is_tracking(&self) -> bool {
        self.state == WorkerState::Tracking
    }

    pub fn show_notification(&self) -> bool {
        self.show_notification
    }
}

struct WorkerRegistration {
    control: mpsc::Sender<ControlMessage>,
    handle: JoinHandle<()>,
}

/// Owns the single worker slot. At most one worker task runs per host;
/// registering while one is up reuses it.
#[derive(Clone)]
pub struct WorkerHost {
    bus: MessageBus,
    remote: Arc<dyn SyncApi>,
    notifier: Option<Arc<dyn Notifier>>,
    sample_interval: Duration,
    slot: Arc<Mutex<Option<WorkerRegistration>>>,
}

impl WorkerHost {
    pub fn new(bus: MessageBus, remote: Arc<dyn SyncApi>, notifier: Option<Arc<dyn Notifier>>) -> Self {
        Self::with_sample_interval(bus, remote, notifier, WORKER_SAMPLE_INTERVAL)
    }

    pub fn with_sample_interval(
        bus: MessageBus,
        remote: Arc<dyn SyncApi>,
        notifier: Option<Arc<dyn Notifier>>,
        sample_interval: Duration,
    ) -> Self {
        Self {
            bus,
            remote,
            notifier,
            sample_interval,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawn the worker task unless one is already running. Fails when there
    /// is no runtime to carry the task.
    pub async fn register(&self) -> Result<(), SyncError> {
        let mut slot = self.slot.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            SyncError::Registration("No async runtime to host the worker".to_string())
        })?;

        let (control_tx, control_rx) = mpsc::channel(8);
        let subscription = self.bus.subscribe();

        let task = WorkerTask {
            bus: self.bus.clone(),
            remote: self.remote.clone(),
            notifier: self.notifier.clone(),
            sample_interval: self.sample_interval,
            machine: WorkerStateMachine::new(),
        };

        let handle = runtime.spawn(task.run(subscription, control_rx));
        *slot = Some(WorkerRegistration {
            control: control_tx,
            handle,
        });

        tracing::info!("Background worker registered");
        Ok(())
    }

    /// Stop and remove the worker. Idempotent.
    pub async fn unregister(&self) {
        let registration = self.slot.lock().await.take();
        let Some(registration) = registration else {
            return;
        };

        if registration
            .control
            .send(ControlMessage::Shutdown)
            .await
            .is_err()
        {
            registration.handle.abort();
            return;
        }

        if registration.handle.await.is_err() {
            tracing::warn!("Worker task ended abnormally during unregister");
        }
        tracing::info!("Background worker unregistered");
    }

    pub async fn is_registered(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Ask the running worker whether its timer is armed. An unregistered
    /// worker reports not tracking.
    pub async fn tracking_status(&self) -> TrackingStatus {
        let control = {
            let slot = self.slot.lock().await;
            let Some(registration) = slot.as_ref() else {
                return TrackingStatus { is_tracking: false };
            };
            registration.control.clone()
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if control.send(ControlMessage::GetStatus(reply_tx)).await.is_err() {
            return TrackingStatus { is_tracking: false };
        }

        reply_rx
            .await
            .unwrap_or(TrackingStatus { is_tracking: false })
    }

    /// Publish a message onto the shared bus.
    pub fn post(&self, message: WorkerMessage) {
        self.bus.publish(message);
    }
}

struct WorkerTask {
    bus: MessageBus,
    remote: Arc<dyn SyncApi>,
    notifier: Option<Arc<dyn Notifier>>,
    sample_interval: Duration,
    machine: WorkerStateMachine,
}

impl WorkerTask {
    async fn run(
        mut self,
        mut subscription: BusSubscription,
        mut control: mpsc::Receiver<ControlMessage>,
    ) {
        self.machine.install();
        tracing::debug!("Worker task running");

        // Absolute deadline of the next sample. Rebuilt every loop pass, so
        // disarming is just setting it back to None.
        let mut next_tick: Option<Instant> = None;

        loop {
            let tick_at = next_tick;
            let timer = async move {
                match tick_at {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                message = subscription.recv() => {
                    let Some(message) = message else {
                        break;
                    };
                    self.handle_message(message, &mut next_tick);
                }
                command = control.recv() => {
                    match command {
                        Some(ControlMessage::GetStatus(reply)) => {
                            let _ = reply.send(TrackingStatus {
                                is_tracking: self.machine.is_tracking(),
                            });
                        }
                        Some(ControlMessage::Shutdown) | None => break,
                    }
                }
                _ = timer => {
                    self.sample_cycle();
                    next_tick = Some(Instant::now() + self.sample_interval);
                }
            }
        }

        if self.machine.stop_tracking() {
            self.bus.publish(WorkerMessage::TrackingStopped {
                timestamp: Utc::now(),
            });
        }
        self.machine.uninstall();
        tracing::debug!("Worker task ended");
    }

    fn handle_message(&mut self, message: WorkerMessage, next_tick: &mut Option<Instant>) {
        match message {
            WorkerMessage::StartTracking { show_notification } => {
                if self.machine.start_tracking(show_notification) {
                    tracing::info!("Tracking started");
                    self.sample_cycle();
                    *next_tick = Some(Instant::now() + self.sample_interval);
                    self.bus.publish(WorkerMessage::TrackingStarted {
                        timestamp: Utc::now(),
                    });
                }
            }
            WorkerMessage::StopTracking => {
                if self.machine.stop_tracking() {
                    tracing::info!("Tracking stopped");
                    *next_tick = None;
                    self.bus.publish(WorkerMessage::TrackingStopped {
                        timestamp: Utc::now(),
                    });
                }
            }
            WorkerMessage::UpdateNotificationSetting { show_notification } => {
                self.machine.set_show_notification(show_notification);
            }
            WorkerMessage::LocationUpdate {
                position,
                battery_level,
                timestamp,
            } => {
                self.relay_sample(position, battery_level, timestamp);
            }
            // Our own broadcasts come back around on the shared bus.
            WorkerMessage::RequestLocation
            | WorkerMessage::TrackingStarted { .. }
            | WorkerMessage::TrackingStopped { .. }
            | WorkerMessage::Unknown => {}
        }
    }

    /// One timer tick: ask the foreground bridge for a reading. The reading
    /// itself comes back later as a LOCATION_UPDATE.
    fn sample_cycle(&self) {
        tracing::debug!("Requesting location sample");
        self.bus.publish(WorkerMessage::RequestLocation);
    }

    /// Deliver a gathered sample to the remote endpoint. The push runs on its
    /// own task so a stop arriving meanwhile is handled without waiting for
    /// the network.
    fn relay_sample(&self, position: Position, battery_level: Option<u8>, timestamp: DateTime<Utc>) {
        let sample = LocationSample::new(
            position.latitude,
            position.longitude,
            position.accuracy,
            battery_level,
            timestamp,
        );

        if let Err(reason) = sample.validate() {
            tracing::warn!("Discarding invalid location sample: {}", reason);
            return;
        }

        if !self.machine.is_tracking() {
            // A reading that raced a stop still gets delivered.
            tracing::debug!("Relaying sample gathered before tracking stopped");
        }

        let remote = self.remote.clone();
        let notifier = if self.machine.is_tracking() && self.machine.show_notification() {
            self.notifier.clone()
        } else {
            None
        };

        tokio::spawn(async move {
            match remote.push_location(&sample).await {
                Ok(()) => {
                    tracing::debug!("Pushed background sample");
                    if let Some(notifier) = notifier {
                        let body = format!("Sent at {}", sample.timestamp.format("%H:%M"));
                        notifier.notify("Location shared", &body).await;
                    }
                }
                Err(err) => {
                    tracing::warn!("Failed to push background sample: {:?}", err);
                }
            }
        });
    }
}

#[test]
fn state_machine_only_starts_from_idle() {
    let mut machine = WorkerStateMachine::new();
    assert_eq!(machine.state(), WorkerState::Uninstalled);
    assert!(!machine.start_tracking(true));

    machine.install();
    assert_eq!(machine.state(), WorkerState::Idle);
    assert!(machine.start_tracking(true));
    assert!(machine.is_tracking());
    assert!(machine.show_notification());

    // Starting again is not a second start, but the setting refreshes.
    assert!(!machine.start_tracking(false));
    assert!(machine.is_tracking());
    assert!(!machine.show_notification());

    assert!(machine.stop_tracking());
    assert_eq!(machine.state(), WorkerState::Idle);
    assert!(!machine.stop_tracking());

    machine.uninstall();
    assert_eq!(machine.state(), WorkerState::Uninstalled);
}

#[test]
fn notification_setting_needs_an_installed_worker() {
    let mut machine = WorkerStateMachine::new();
    machine.set_show_notification(true);
    assert!(!machine.show_notification());

    machine.install();
    machine.set_show_notification(true);
    assert!(machine.show_notification());
}

#[test]
fn registration_requires_an_async_runtime() {
    let bus = MessageBus::new();
    let remote = crate::testing::FakeRemote::new();
    let host = WorkerHost::new(bus, remote, None);

    let result = futures::executor::block_on(host.register());
    assert!(matches!(result, Err(SyncError::Registration(_))));
    assert!(!futures::executor::block_on(host.is_registered()));
}

#[tokio::test]
async fn register_is_idempotent() {
    let bus = MessageBus::new();
    let remote = crate::testing::FakeRemote::new();
    let host = WorkerHost::new(bus, remote, None);

    host.register().await.unwrap();
    host.register().await.unwrap();
    assert!(host.is_registered().await);
    assert!(!host.tracking_status().await.is_tracking);

    host.unregister().await;
    host.unregister().await;
    assert!(!host.is_registered().await);
}

#[tokio::test]
async fn start_samples_immediately_and_announces_itself() {
    let bus = MessageBus::new();
    let remote = crate::testing::FakeRemote::new();
    let host = WorkerHost::with_sample_interval(
        bus.clone(),
        remote.clone(),
        None,
        Duration::from_secs(60),
    );
    host.register().await.unwrap();

    let mut observer = bus.subscribe();
    host.post(WorkerMessage::StartTracking {
        show_notification: false,
    });

    let mut saw_request = false;
    loop {
        match crate::testing::await_message(&mut observer, |_| true).await {
            WorkerMessage::RequestLocation => saw_request = true,
            WorkerMessage::TrackingStarted { .. } => break,
            _ => {}
        }
    }
    assert!(saw_request, "no sample request before the started event");
    assert!(host.tracking_status().await.is_tracking);

    host.unregister().await;
}

#[tokio::test]
async fn timer_keeps_requesting_at_the_sample_interval() {
    let bus = MessageBus::new();
    let remote = crate::testing::FakeRemote::new();
    let host = WorkerHost::with_sample_interval(
        bus.clone(),
        remote.clone(),
        None,
        Duration::from_millis(25),
    );
    host.register().await.unwrap();

    let mut observer = bus.subscribe();
    host.post(WorkerMessage::StartTracking {
        show_notification: false,
    });

    let mut requests = 0;
    while requests < 3 {
        if let WorkerMessage::RequestLocation =
            crate::testing::await_message(&mut observer, |_| true).await
        {
            requests += 1;
        }
    }

    host.unregister().await;
}

#[tokio::test]
async fn stop_disarms_the_timer() {
    let bus = MessageBus::new();
    let remote = crate::testing::FakeRemote::new();
    let host = WorkerHost::with_sample_interval(
        bus.clone(),
        remote.clone(),
        None,
        Duration::from_millis(25),
    );
    host.register().await.unwrap();

    let mut observer = bus.subscribe();
    host.post(WorkerMessage::StartTracking {
        show_notification: false,
    });
    crate::testing::await_message(&mut observer, |message| {
        matches!(message, WorkerMessage::TrackingStarted { .. })
    })
    .await;

    host.post(WorkerMessage::StopTracking);
    crate::testing::await_message(&mut observer, |message| {
        matches!(message, WorkerMessage::TrackingStopped { .. })
    })
    .await;
    assert!(!host.tracking_status().await.is_tracking);

    // Several intervals of silence. Anything arriving now must not be a
    // sample request.
    let quiet = tokio::time::timeout(Duration::from_millis(120), async {
        loop {
            if let Some(WorkerMessage::RequestLocation) = observer.recv().await {
                panic!("timer fired after stop");
            }
        }
    })
    .await;
    assert!(quiet.is_err());

    host.unregister().await;
}

#[tokio::test]
async fn gathered_samples_are_pushed_to_the_remote() {
    let bus = MessageBus::new();
    let remote = crate::testing::FakeRemote::new();
    let host = WorkerHost::with_sample_interval(
        bus.clone(),
        remote.clone(),
        None,
        Duration::from_secs(60),
    );
    host.register().await.unwrap();

    let mut observer = bus.subscribe();
    host.post(WorkerMessage::StartTracking {
        show_notification: false,
    });
    crate::testing::await_message(&mut observer, |message| {
        matches!(message, WorkerMessage::TrackingStarted { .. })
    })
    .await;

    let sample = crate::testing::sample_at(55.6761, 12.5683, Some(70));
    host.post(WorkerMessage::location_update(&sample));

    crate::testing::await_until("sample push", || remote.pushes.lock().unwrap().len() == 1).await;
    let pushed = remote.pushes.lock().unwrap()[0];
    assert_eq!(pushed.latitude(), 55.6761);
    assert_eq!(pushed.battery_level, Some(70));

    host.unregister().await;
}

#[tokio::test]
async fn late_sample_is_still_relayed_without_notification() {
    let bus = MessageBus::new();
    let remote = crate::testing::FakeRemote::new();
    let notifier = crate::testing::RecordingNotifier::granting();
    let host = WorkerHost::new(bus.clone(), remote.clone(), Some(notifier.clone()));
    host.register().await.unwrap();

    // No tracking start. This models a reading that arrives after a stop.
    let sample = crate::testing::sample_at(55.6761, 12.5683, None);
    host.post(WorkerMessage::location_update(&sample));

    crate::testing::await_until("late sample push", || {
        remote.pushes.lock().unwrap().len() == 1
    })
    .await;
    assert!(notifier.notifications.lock().unwrap().is_empty());

    host.unregister().await;
}

#[tokio::test]
async fn late_sample_after_stop_does_not_rearm_the_timer() {
    let bus = MessageBus::new();
    let remote = crate::testing::FakeRemote::new();
    let host = WorkerHost::with_sample_interval(
        bus.clone(),
        remote.clone(),
        None,
        Duration::from_millis(25),
    );
    host.register().await.unwrap();

    let mut observer = bus.subscribe();
    host.post(WorkerMessage::StartTracking {
        show_notification: false,
    });
    crate::testing::await_message(&mut observer, |message| {
        matches!(message, WorkerMessage::RequestLocation)
    })
    .await;

    // Stop with that request still unanswered, then answer it.
    host.post(WorkerMessage::StopTracking);
    crate::testing::await_message(&mut observer, |message| {
        matches!(message, WorkerMessage::TrackingStopped { .. })
    })
    .await;

    let sample = crate::testing::sample_at(55.6761, 12.5683, Some(40));
    host.post(WorkerMessage::location_update(&sample));
    crate::testing::await_until("late sample push", || {
        remote.pushes.lock().unwrap().len() == 1
    })
    .await;

    // The late answer is relayed, but the worker stays idle.
    assert!(!host.tracking_status().await.is_tracking);
    let quiet = tokio::time::timeout(Duration::from_millis(120), async {
        loop {
            if let Some(WorkerMessage::RequestLocation) = observer.recv().await {
                panic!("timer rearmed by the late sample");
            }
        }
    })
    .await;
    assert!(quiet.is_err());

    host.unregister().await;
}

#[tokio::test]
async fn invalid_samples_never_reach_the_remote() {
    let bus = MessageBus::new();
    let remote = crate::testing::FakeRemote::new();
    let host = WorkerHost::new(bus.clone(), remote.clone(), None);
    host.register().await.unwrap();

    host.post(WorkerMessage::LocationUpdate {
        position: Position {
            latitude: f64::NAN,
            longitude: 12.5683,
            accuracy: 10.0,
        },
        battery_level: None,
        timestamp: Utc::now(),
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(remote.pushes.lock().unwrap().is_empty());

    host.unregister().await;
}

#[tokio::test]
async fn successful_relay_notifies_when_enabled() {
    let bus = MessageBus::new();
    let remote = crate::testing::FakeRemote::new();
    let notifier = crate::testing::RecordingNotifier::granting();
    let host = WorkerHost::with_sample_interval(
        bus.clone(),
        remote.clone(),
        Some(notifier.clone()),
        Duration::from_secs(60),
    );
    host.register().await.unwrap();

    let mut observer = bus.subscribe();
    host.post(WorkerMessage::StartTracking {
        show_notification: true,
    });
    crate::testing::await_message(&mut observer, |message| {
        matches!(message, WorkerMessage::TrackingStarted { .. })
    })
    .await;

    let sample = crate::testing::sample_at(55.6761, 12.5683, Some(55));
    host.post(WorkerMessage::location_update(&sample));

    crate::testing::await_until("relay notification", || {
        !notifier.notifications.lock().unwrap().is_empty()
    })
    .await;
    let notifications = notifier.notifications.lock().unwrap();
    assert_eq!(notifications[0].0, "Location shared");

    host.unregister().await;
}

#[tokio::test]
async fn unregister_announces_the_stop_of_a_running_timer() {
    let bus = MessageBus::new();
    let remote = crate::testing::FakeRemote::new();
    let host = WorkerHost::with_sample_interval(
        bus.clone(),
        remote.clone(),
        None,
        Duration::from_secs(60),
    );
    host.register().await.unwrap();

    let mut observer = bus.subscribe();
    host.post(WorkerMessage::StartTracking {
        show_notification: false,
    });
    crate::testing::await_message(&mut observer, |message| {
        matches!(message, WorkerMessage::TrackingStarted { .. })
    })
    .await;

    host.unregister().await;
    crate::testing::await_message(&mut observer, |message| {
        matches!(message, WorkerMessage::TrackingStopped { .. })
    })
    .await;
    assert!(!host.is_registered().await);
    assert!(!host.tracking_status().await.is_tracking);
}
