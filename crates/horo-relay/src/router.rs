//! Interaction router: follows the facility's listener streams while an
//! identity is signed in, and hands tapped notification payloads to a
//! caller-supplied handler.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use horo_types::notification::NotificationData;

use crate::events::{EventBus, RelayEvent};
use crate::sink::Listeners;

pub trait InteractionHandler: Send + Sync {
    fn on_tap(&self, data: NotificationData);
}

impl<F> InteractionHandler for F
where
    F: Fn(NotificationData) + Send + Sync,
{
    fn on_tap(&self, data: NotificationData) {
        self(data)
    }
}

/// Logs the tap and does nothing else. No navigation target is wired up.
pub struct LogHandler;

impl InteractionHandler for LogHandler {
    fn on_tap(&self, data: NotificationData) {
        info!(resource = %data.resource_class, payload = %data.payload, "Notification pressed");
    }
}

pub struct InteractionRouter {
    handler: Arc<dyn InteractionHandler>,
    bus: EventBus,
    listeners: Vec<JoinHandle<()>>,
}

impl InteractionRouter {
    pub fn new(handler: Arc<dyn InteractionHandler>, bus: EventBus) -> Self {
        Self {
            handler,
            bus,
            listeners: Vec::new(),
        }
    }

    /// Extract the structured payload from a tapped notification's data and
    /// forward it. Data this app did not produce is ignored.
    pub fn on_notification_tapped(&self, data: &Value) -> Option<NotificationData> {
        route_tap(self.handler.as_ref(), &self.bus, data)
    }

    pub fn is_attached(&self) -> bool {
        !self.listeners.is_empty()
    }

    /// Start following the received and response streams. Replaces any
    /// listeners already attached.
    pub fn attach(&mut self, listeners: Listeners) {
        self.detach();
        let Listeners {
            mut received,
            mut responses,
        } = listeners;

        self.listeners.push(tokio::spawn(async move {
            loop {
                match received.recv().await {
                    Ok(notification) => {
                        info!(id = %notification.id, title = %notification.content.title, "Notification received");
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Missed {n} received-notification events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        let handler = Arc::clone(&self.handler);
        let bus = self.bus.clone();
        self.listeners.push(tokio::spawn(async move {
            loop {
                match responses.recv().await {
                    Ok(response) => {
                        debug!(id = %response.notification.id, action = %response.action, "Notification response");
                        route_tap(handler.as_ref(), &bus, &response.notification.content.data);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Missed {n} notification responses");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    /// Remove both listeners. Returns how many were removed.
    pub fn detach(&mut self) -> usize {
        let count = self.listeners.len();
        for listener in self.listeners.drain(..) {
            listener.abort();
        }
        count
    }
}

impl Drop for InteractionRouter {
    fn drop(&mut self) {
        self.detach();
    }
}

fn route_tap(handler: &dyn InteractionHandler, bus: &EventBus, data: &Value) -> Option<NotificationData> {
    let Some(data) = NotificationData::from_value(data) else {
        debug!("Ignoring tap on notification without horoscope data");
        return None;
    };
    handler.on_tap(data.clone());
    bus.send(RelayEvent::NotificationTapped { data: data.clone() });
    Some(data)
}
