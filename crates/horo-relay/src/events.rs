/// Relay event bus: tokio broadcast channel carrying `RelayEvent`s.
///
/// The relay publishes what it does here; UI layers (and tests) subscribe to
/// observe it without reaching into relay state.

use serde::Serialize;
use tokio::sync::broadcast;

use horo_types::{
    identity::Identity,
    notification::{NotificationData, NotificationIntent, PermissionState},
    resource::{ChangeOperation, ResourceClass},
};

const BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    IdentityChanged {
        identity: Option<Identity>,
    },
    PermissionResolved {
        state: PermissionState,
    },
    SubscriptionOpened {
        resource: ResourceClass,
        identity: Identity,
    },
    SubscriptionFailed {
        resource: ResourceClass,
        reason: String,
    },
    SubscriptionsClosed {
        count: usize,
    },
    EventIgnored {
        resource: ResourceClass,
        operation: ChangeOperation,
        reason: IgnoreReason,
    },
    NotificationDispatched {
        intent: NotificationIntent,
        delivered: bool,
    },
    NotificationTapped {
        data: NotificationData,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// The operation has no notification mapping.
    Unmapped,
    /// Switched off in the notification preferences.
    Disabled,
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RelayEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    /// Subscribe to receive future events.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    /// Silently drops the event if there are no subscribers.
    pub fn send(&self, event: RelayEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
