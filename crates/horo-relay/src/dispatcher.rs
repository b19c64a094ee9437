//! Notification dispatcher: owns the per-process permission cache and
//! hands intents to the selected sink.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use horo_types::notification::{NotificationIntent, PermissionState};

use crate::events::{EventBus, RelayEvent};
use crate::sink::{Listeners, NotificationSink};

pub struct Dispatcher {
    sink: Arc<dyn NotificationSink>,
    permission: Mutex<PermissionState>,
    bus: EventBus,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>, bus: EventBus) -> Self {
        Self {
            sink,
            permission: Mutex::new(PermissionState::Unknown),
            bus,
        }
    }

    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    pub async fn permission(&self) -> PermissionState {
        *self.permission.lock().await
    }

    /// Resolve delivery permission, prompting at most once per process.
    /// Later calls return the cached answer. Facility errors resolve to
    /// `Denied` for this call only and leave the cache empty.
    pub async fn request_permission(&self) -> PermissionState {
        let mut cached = self.permission.lock().await;
        if cached.is_resolved() {
            return *cached;
        }

        let status = match self.sink.current_permission().await {
            Ok(status) if status.is_granted() => status,
            Ok(_) => match self.sink.prompt_permission().await {
                Ok(status) => status,
                Err(e) => {
                    error!("Error requesting notification permission: {e}");
                    return PermissionState::Denied;
                }
            },
            Err(e) => {
                error!("Error checking notification permission: {e}");
                return PermissionState::Denied;
            }
        };

        let state = PermissionState::from(status);
        *cached = state;
        if state.is_granted() {
            info!(sink = self.sink.name(), "Notification permission granted");
        } else {
            warn!("Notification permission denied, horoscope alerts will not be shown");
        }
        self.bus.send(RelayEvent::PermissionResolved { state });
        state
    }

    /// Forget the cached answer and ask again.
    pub async fn refresh_permission(&self) -> PermissionState {
        *self.permission.lock().await = PermissionState::Unknown;
        self.request_permission().await
    }

    /// Hand one intent to the sink. Permission is not checked here; a
    /// facility without permission drops the notification itself. Failures
    /// are logged and swallowed. No de-duplication: every call is one
    /// delivery attempt.
    pub async fn dispatch(&self, intent: &NotificationIntent) -> Option<Uuid> {
        let id = match self.sink.deliver(intent).await {
            Ok(id) => id,
            Err(e) => {
                error!(title = %intent.title, "Error scheduling notification: {e}");
                None
            }
        };
        self.bus.send(RelayEvent::NotificationDispatched {
            intent: intent.clone(),
            delivered: id.is_some(),
        });
        id
    }

    pub fn listeners(&self) -> Option<Listeners> {
        self.sink.listeners()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper;
    use crate::sink::{NativeSink, NoopSink};
    use crate::testing::RecordingFacility;
    use horo_types::notification::PermissionStatus;
    use horo_types::resource::{ChangeOperation, ResourceClass};
    use serde_json::json;

    fn native(facility: &Arc<RecordingFacility>) -> Dispatcher {
        let sink = Arc::new(NativeSink::new(facility.clone(), None));
        Dispatcher::new(sink, EventBus::new())
    }

    fn daily_intent() -> NotificationIntent {
        mapper::map(ResourceClass::Daily, ChangeOperation::Inserted, json!({ "id": "d1" })).unwrap()
    }

    #[tokio::test]
    async fn already_granted_skips_prompt() {
        let facility = Arc::new(RecordingFacility::granted());
        let dispatcher = native(&facility);
        assert_eq!(dispatcher.request_permission().await, PermissionState::Granted);
        assert_eq!(facility.prompts(), 0);
    }

    #[tokio::test]
    async fn prompts_at_most_once() {
        let facility = Arc::new(RecordingFacility::prompting(PermissionStatus::Granted));
        let dispatcher = native(&facility);

        assert_eq!(dispatcher.request_permission().await, PermissionState::Granted);
        assert_eq!(dispatcher.request_permission().await, PermissionState::Granted);
        assert_eq!(facility.prompts(), 1);
    }

    #[tokio::test]
    async fn denial_is_cached_too() {
        let facility = Arc::new(RecordingFacility::prompting(PermissionStatus::Denied));
        let dispatcher = native(&facility);

        assert_eq!(dispatcher.request_permission().await, PermissionState::Denied);
        assert_eq!(dispatcher.request_permission().await, PermissionState::Denied);
        assert_eq!(facility.prompts(), 1);
        assert_eq!(dispatcher.permission().await, PermissionState::Denied);
    }

    #[tokio::test]
    async fn refresh_asks_again() {
        let facility = Arc::new(RecordingFacility::prompting(PermissionStatus::Denied));
        let dispatcher = native(&facility);
        dispatcher.request_permission().await;

        facility.set_prompt_answer(PermissionStatus::Granted);
        assert_eq!(dispatcher.refresh_permission().await, PermissionState::Granted);
        assert_eq!(facility.prompts(), 2);
    }

    #[tokio::test]
    async fn noop_sink_is_granted_without_prompt() {
        let dispatcher = Dispatcher::new(Arc::new(NoopSink), EventBus::new());
        assert_eq!(dispatcher.request_permission().await, PermissionState::Granted);
        assert_eq!(dispatcher.dispatch(&daily_intent()).await, None);
    }

    #[tokio::test]
    async fn identical_intents_dispatch_twice() {
        let facility = Arc::new(RecordingFacility::granted());
        let dispatcher = native(&facility);

        let a = dispatcher.dispatch(&daily_intent()).await.unwrap();
        let b = dispatcher.dispatch(&daily_intent()).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(facility.scheduled().len(), 2);
    }

    #[tokio::test]
    async fn dispatch_without_permission_is_still_attempted() {
        let facility = Arc::new(RecordingFacility::prompting(PermissionStatus::Denied));
        let dispatcher = native(&facility);
        dispatcher.request_permission().await;

        dispatcher.dispatch(&daily_intent()).await;
        assert_eq!(facility.scheduled().len(), 1);
    }

    #[tokio::test]
    async fn facility_failure_is_swallowed() {
        let facility = Arc::new(RecordingFacility::granted());
        facility.set_fail_schedule(true);
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let dispatcher = Dispatcher::new(Arc::new(NativeSink::new(facility.clone(), None)), bus);

        assert_eq!(dispatcher.dispatch(&daily_intent()).await, None);
        match rx.recv().await.unwrap() {
            RelayEvent::NotificationDispatched { delivered, .. } => assert!(!delivered),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
