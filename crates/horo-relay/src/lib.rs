pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod feed;
pub mod mapper;
pub mod router;
pub mod session;
pub mod sink;
pub mod store;
pub mod subscriptions;
pub mod theme;

#[cfg(test)]
mod testing;

pub use error::{RelayError, Result};
pub use events::{EventBus, RelayEvent};

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use horo_types::{config::NotificationPrefs, identity::Identity, resource::ChangeEvent};

use dispatcher::Dispatcher;
use events::IgnoreReason;
use feed::ChangeFeed;
use router::{InteractionHandler, InteractionRouter};
use session::{IdentityChange, SessionGate};
use sink::NotificationSink;
use subscriptions::{SubscriptionManager, TaggedEvent};
use theme::ThemeProvider;

/// Everything the relay needs from the outside, passed in explicitly.
pub struct RelayDeps {
    pub session: Arc<SessionGate>,
    pub theme: Arc<ThemeProvider>,
    pub feed: Arc<dyn ChangeFeed>,
    pub sink: Arc<dyn NotificationSink>,
    pub handler: Arc<dyn InteractionHandler>,
    pub prefs: NotificationPrefs,
}

/// The realtime relay: turns horoscope row changes for the signed-in user
/// into local notifications.
///
/// Runs as a single task: identity changes and change events are handled
/// one at a time, identity changes first.
pub struct Relay {
    session: Arc<SessionGate>,
    theme: Arc<ThemeProvider>,
    identity_rx: broadcast::Receiver<IdentityChange>,
    subscriptions: SubscriptionManager,
    events_rx: mpsc::UnboundedReceiver<TaggedEvent>,
    dispatcher: Arc<Dispatcher>,
    router: InteractionRouter,
    prefs: NotificationPrefs,
    bus: EventBus,
}

impl Relay {
    pub fn new(deps: RelayDeps) -> Self {
        let bus = EventBus::new();
        let identity_rx = deps.session.subscribe();
        let (subscriptions, events_rx) = SubscriptionManager::new(deps.feed, bus.clone());
        let dispatcher = Arc::new(Dispatcher::new(deps.sink, bus.clone()));
        let router = InteractionRouter::new(deps.handler, bus.clone());

        Self {
            session: deps.session,
            theme: deps.theme,
            identity_rx,
            subscriptions,
            events_rx,
            dispatcher,
            router,
            prefs: deps.prefs,
            bus,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn theme(&self) -> Arc<ThemeProvider> {
        Arc::clone(&self.theme)
    }

    /// Start the relay loop in the background.
    pub fn spawn(self) -> RelayHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let bus = self.bus.clone();
        let dispatcher = Arc::clone(&self.dispatcher);
        let theme = Arc::clone(&self.theme);
        let task = tokio::spawn(self.run(shutdown_rx));
        RelayHandle {
            shutdown: Some(shutdown_tx),
            task,
            bus,
            dispatcher,
            theme,
        }
    }

    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        info!(sink = self.dispatcher.sink_name(), "Relay started");
        if let Some(id) = self.session.current() {
            self.activate(id).await;
        }

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                change = self.identity_rx.recv() => match change {
                    Ok(IdentityChange::BecamePresent(id)) => self.activate(id).await,
                    Ok(IdentityChange::BecameAbsent(previous)) => self.deactivate(&previous).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Missed {n} identity changes, resyncing");
                        self.resync().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(tagged) = self.events_rx.recv() => self.handle_event(tagged).await,
            }
        }

        self.teardown();
    }

    async fn activate(&mut self, id: Identity) {
        if self.subscriptions.owner() == Some(&id) {
            return;
        }
        self.bus.send(RelayEvent::IdentityChanged {
            identity: Some(id.clone()),
        });

        let permission = self.dispatcher.request_permission().await;
        if permission.is_granted() {
            if let Some(listeners) = self.dispatcher.listeners() {
                self.router.attach(listeners);
            }
        } else {
            self.router.detach();
        }

        self.subscriptions.on_identity_changed(Some(id)).await;
    }

    async fn deactivate(&mut self, previous: &Identity) {
        debug!(user = %previous, "Signed out, tearing down subscriptions");
        self.subscriptions.on_identity_changed(None).await;
        self.router.detach();
        self.bus.send(RelayEvent::IdentityChanged { identity: None });
    }

    async fn resync(&mut self) {
        match self.session.current() {
            Some(id) => self.activate(id).await,
            None => {
                if let Some(previous) = self.subscriptions.owner().cloned() {
                    self.deactivate(&previous).await;
                }
            }
        }
    }

    async fn handle_event(&mut self, tagged: TaggedEvent) {
        if !self.subscriptions.is_current(&tagged) {
            trace!(generation = tagged.generation, "Dropping event from a closed subscription");
            return;
        }

        let ChangeEvent {
            resource_class,
            operation,
            payload,
        } = tagged.event;
        info!(resource = %resource_class, %operation, "Horoscope change received");

        if !self.prefs.allows(resource_class) {
            debug!(resource = %resource_class, "Notifications switched off for this class");
            self.bus.send(RelayEvent::EventIgnored {
                resource: resource_class,
                operation,
                reason: IgnoreReason::Disabled,
            });
            return;
        }

        match mapper::map(resource_class, operation, payload) {
            Some(intent) => {
                self.dispatcher.dispatch(&intent).await;
            }
            None => {
                debug!(resource = %resource_class, %operation, "No notification for this operation");
                self.bus.send(RelayEvent::EventIgnored {
                    resource: resource_class,
                    operation,
                    reason: IgnoreReason::Unmapped,
                });
            }
        }
    }

    fn teardown(&mut self) {
        let closed = self.subscriptions.close_all();
        let removed = self.router.detach();
        info!(closed, removed, "Relay stopped");
    }
}

/// Control handle for a spawned relay. Dropping it also stops the relay.
pub struct RelayHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    bus: EventBus,
    dispatcher: Arc<Dispatcher>,
    theme: Arc<ThemeProvider>,
}

impl RelayHandle {
    pub fn subscribe_events(&self) -> broadcast::Receiver<RelayEvent> {
        self.bus.subscribe()
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn theme(&self) -> Arc<ThemeProvider> {
        Arc::clone(&self.theme)
    }

    /// Stop the relay and wait until every subscription is closed.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!("Relay task ended abnormally: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedLogEntry, MemoryFeed};
    use crate::router::LogHandler;
    use crate::sink::{NativeSink, NoopSink};
    use crate::store::MemoryStore;
    use crate::testing::RecordingFacility;
    use horo_types::notification::{PermissionState, PermissionStatus};
    use horo_types::resource::{ChangeOperation, ResourceClass};
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        gate: Arc<SessionGate>,
        feed: MemoryFeed,
        facility: Arc<RecordingFacility>,
        handle: RelayHandle,
        rx: broadcast::Receiver<RelayEvent>,
    }

    fn start_with(facility: RecordingFacility, prefs: NotificationPrefs) -> Harness {
        let gate = Arc::new(SessionGate::new());
        let feed = MemoryFeed::new();
        let facility = Arc::new(facility);
        let relay = Relay::new(RelayDeps {
            session: Arc::clone(&gate),
            theme: Arc::new(ThemeProvider::load(Arc::new(MemoryStore::new()))),
            feed: Arc::new(feed.clone()),
            sink: Arc::new(NativeSink::new(facility.clone(), None)),
            handler: Arc::new(LogHandler),
            prefs,
        });
        let rx = relay.bus().subscribe();
        let handle = relay.spawn();
        Harness {
            gate,
            feed,
            facility,
            handle,
            rx,
        }
    }

    fn start() -> Harness {
        start_with(RecordingFacility::granted(), NotificationPrefs::default())
    }

    /// Wait for the next bus event matching `pred`, skipping others.
    async fn next_matching(
        rx: &mut broadcast::Receiver<RelayEvent>,
        pred: impl Fn(&RelayEvent) -> bool,
    ) -> RelayEvent {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let event = rx.recv().await.unwrap();
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for relay event")
    }

    async fn wait_subscribed(h: &mut Harness, count: usize) {
        for _ in 0..count {
            next_matching(&mut h.rx, |e| matches!(e, RelayEvent::SubscriptionOpened { .. })).await;
        }
    }

    async fn wait_dispatched(h: &mut Harness) -> RelayEvent {
        next_matching(&mut h.rx, |e| matches!(e, RelayEvent::NotificationDispatched { .. })).await
    }

    #[tokio::test]
    async fn daily_insert_produces_one_notification() {
        let mut h = start();
        h.gate.set_identity(Some("u1".into()));
        wait_subscribed(&mut h, 3).await;

        h.feed.publish(ResourceClass::Daily, &"u1".into(), ChangeOperation::Inserted, json!({ "id": "d1" }));
        wait_dispatched(&mut h).await;

        let scheduled = h.facility.scheduled();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].content.title, "Your Daily Horoscope is Ready!");
        assert_eq!(
            scheduled[0].content.data,
            json!({ "resourceClass": "daily", "payload": { "id": "d1" } })
        );
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_events_are_not_deduplicated() {
        let mut h = start();
        h.gate.set_identity(Some("u1".into()));
        wait_subscribed(&mut h, 3).await;

        for _ in 0..2 {
            h.feed.publish(ResourceClass::Weekly, &"u1".into(), ChangeOperation::Updated, json!({ "id": "w1" }));
        }
        wait_dispatched(&mut h).await;
        wait_dispatched(&mut h).await;

        let scheduled = h.facility.scheduled();
        assert_eq!(scheduled.len(), 2);
        assert_eq!(scheduled[0], scheduled[1]);
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn identity_switch_closes_old_handles_first() {
        let mut h = start();
        h.gate.set_identity(Some("u1".into()));
        wait_subscribed(&mut h, 3).await;
        h.gate.set_identity(Some("u2".into()));
        wait_subscribed(&mut h, 3).await;

        let log = h.feed.log();
        let closes: Vec<usize> = log
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, FeedLogEntry::Closed { owner, .. } if owner.as_str() == "u1"))
            .map(|(i, _)| i)
            .collect();
        let first_u2_open = log
            .iter()
            .position(|e| matches!(e, FeedLogEntry::Opened { owner, .. } if owner.as_str() == "u2"))
            .unwrap();
        assert_eq!(closes.len(), 3);
        assert!(closes.iter().all(|&i| i < first_u2_open));

        let open = h.feed.open_subscriptions();
        assert_eq!(open.len(), 3);
        assert!(open.iter().all(|(_, owner)| owner.as_str() == "u2"));
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn sign_out_closes_everything_once() {
        let mut h = start();
        h.gate.set_identity(Some("u1".into()));
        wait_subscribed(&mut h, 3).await;

        h.gate.set_identity(None);
        next_matching(&mut h.rx, |e| matches!(e, RelayEvent::IdentityChanged { identity: None })).await;

        assert!(h.feed.open_subscriptions().is_empty());
        assert_eq!(h.feed.close_counts(), vec![1, 1, 1]);

        // Nobody is listening any more.
        let delivered = h.feed.publish(ResourceClass::Daily, &"u1".into(), ChangeOperation::Inserted, json!({}));
        assert_eq!(delivered, 0);

        h.handle.shutdown().await;
        assert_eq!(h.feed.close_counts(), vec![1, 1, 1]);
    }

    #[tokio::test]
    async fn shutdown_closes_open_handles() {
        let mut h = start();
        h.gate.set_identity(Some("u1".into()));
        wait_subscribed(&mut h, 3).await;

        let feed = h.feed.clone();
        h.handle.shutdown().await;
        assert!(feed.open_subscriptions().is_empty());
        assert_eq!(feed.close_counts(), vec![1, 1, 1]);
    }

    #[tokio::test]
    async fn existing_identity_is_picked_up_on_start() {
        let gate = Arc::new(SessionGate::new());
        gate.set_identity(Some("u9".into()));
        let feed = MemoryFeed::new();
        let relay = Relay::new(RelayDeps {
            session: Arc::clone(&gate),
            theme: Arc::new(ThemeProvider::load(Arc::new(MemoryStore::new()))),
            feed: Arc::new(feed.clone()),
            sink: Arc::new(NoopSink),
            handler: Arc::new(LogHandler),
            prefs: NotificationPrefs::default(),
        });
        let mut rx = relay.bus().subscribe();
        let handle = relay.spawn();

        for _ in 0..3 {
            next_matching(&mut rx, |e| matches!(e, RelayEvent::SubscriptionOpened { .. })).await;
        }
        assert_eq!(feed.open_subscriptions().len(), 3);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn permission_is_requested_once_across_sign_ins() {
        let mut h = start_with(
            RecordingFacility::prompting(PermissionStatus::Granted),
            NotificationPrefs::default(),
        );
        h.gate.set_identity(Some("u1".into()));
        wait_subscribed(&mut h, 3).await;
        h.gate.set_identity(None);
        h.gate.set_identity(Some("u1".into()));
        wait_subscribed(&mut h, 3).await;

        assert_eq!(h.facility.prompts(), 1);
        assert_eq!(h.handle.dispatcher().permission().await, PermissionState::Granted);
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn disabled_class_is_skipped() {
        let prefs = NotificationPrefs {
            monthly: false,
            ..NotificationPrefs::default()
        };
        let mut h = start_with(RecordingFacility::granted(), prefs);
        h.gate.set_identity(Some("u1".into()));
        wait_subscribed(&mut h, 3).await;

        h.feed.publish(ResourceClass::Monthly, &"u1".into(), ChangeOperation::Inserted, json!({}));
        let ignored = next_matching(&mut h.rx, |e| matches!(e, RelayEvent::EventIgnored { .. })).await;
        assert_eq!(
            ignored,
            RelayEvent::EventIgnored {
                resource: ResourceClass::Monthly,
                operation: ChangeOperation::Inserted,
                reason: IgnoreReason::Disabled,
            }
        );
        assert!(h.facility.scheduled().is_empty());
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn delete_events_are_ignored() {
        let mut h = start();
        h.gate.set_identity(Some("u1".into()));
        wait_subscribed(&mut h, 3).await;

        h.feed.publish(ResourceClass::Daily, &"u1".into(), ChangeOperation::Deleted, json!({}));
        next_matching(&mut h.rx, |e| {
            matches!(e, RelayEvent::EventIgnored { reason: IgnoreReason::Unmapped, .. })
        })
        .await;
        assert!(h.facility.scheduled().is_empty());
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn taps_reach_the_router_while_signed_in() {
        let mut h = start();
        h.gate.set_identity(Some("u1".into()));
        wait_subscribed(&mut h, 3).await;

        h.facility.tap(json!({ "resourceClass": "monthly", "payload": { "id": "m1" } }));
        let tapped = next_matching(&mut h.rx, |e| matches!(e, RelayEvent::NotificationTapped { .. })).await;
        match tapped {
            RelayEvent::NotificationTapped { data } => assert_eq!(data.resource_class, ResourceClass::Monthly),
            other => panic!("unexpected event: {other:?}"),
        }
        h.handle.shutdown().await;
    }
}
