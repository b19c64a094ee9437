//! Terminal stand-in for the OS notification facility.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use horo_relay::sink::NotificationFacility;
use horo_relay::Result;
use horo_types::notification::{
    DeliveredNotification, NotificationContent, NotificationRequest, NotificationResponse,
    PermissionStatus, DEFAULT_ACTION,
};

/// Prints notifications to stdout. Permission is always granted.
pub struct ConsoleFacility {
    received: broadcast::Sender<DeliveredNotification>,
    responses: broadcast::Sender<NotificationResponse>,
}

impl ConsoleFacility {
    pub fn new() -> Self {
        let (received, _) = broadcast::channel(64);
        let (responses, _) = broadcast::channel(64);
        Self { received, responses }
    }

    /// Pretend the user tapped a notification carrying `data`.
    pub fn tap(&self, data: Value) {
        let notification = DeliveredNotification {
            id: Uuid::new_v4(),
            content: NotificationContent {
                title: String::new(),
                body: String::new(),
                data,
                sound: None,
            },
            delivered_at: Utc::now(),
        };
        let _ = self.responses.send(NotificationResponse {
            notification,
            action: DEFAULT_ACTION.to_string(),
        });
    }
}

#[async_trait]
impl NotificationFacility for ConsoleFacility {
    async fn get_permissions(&self) -> Result<PermissionStatus> {
        Ok(PermissionStatus::Granted)
    }

    async fn request_permissions(&self) -> Result<PermissionStatus> {
        Ok(PermissionStatus::Granted)
    }

    async fn schedule(&self, request: NotificationRequest) -> Result<Uuid> {
        let delivered = DeliveredNotification {
            id: Uuid::new_v4(),
            content: request.content,
            delivered_at: Utc::now(),
        };
        println!("[notification] {}: {}", delivered.content.title, delivered.content.body);
        let id = delivered.id;
        let _ = self.received.send(delivered);
        Ok(id)
    }

    fn received_listener(&self) -> broadcast::Receiver<DeliveredNotification> {
        self.received.subscribe()
    }

    fn response_listener(&self) -> broadcast::Receiver<NotificationResponse> {
        self.responses.subscribe()
    }
}
