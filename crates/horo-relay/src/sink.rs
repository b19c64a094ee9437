//! Notification delivery capability.
//!
//! The OS notification facility is an external collaborator. A
//! `NotificationSink` wraps it (`NativeSink`) or stands in for it on
//! platforms that have none (`NoopSink`). The variant is picked once, at
//! startup, by [`select_sink`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use horo_types::{
    config::Platform,
    notification::{
        DeliveredNotification, NotificationIntent, NotificationRequest, NotificationResponse,
        PermissionStatus,
    },
};

use crate::error::Result;

/// The OS-level local notification facility.
#[async_trait]
pub trait NotificationFacility: Send + Sync {
    async fn get_permissions(&self) -> Result<PermissionStatus>;

    /// Show the permission prompt.
    async fn request_permissions(&self) -> Result<PermissionStatus>;

    /// Enqueue a notification. A `None` trigger means deliver now.
    async fn schedule(&self, request: NotificationRequest) -> Result<Uuid>;

    /// Notifications presented while the app is in the foreground.
    fn received_listener(&self) -> broadcast::Receiver<DeliveredNotification>;

    /// User interactions with delivered notifications.
    fn response_listener(&self) -> broadcast::Receiver<NotificationResponse>;
}

/// Listener streams handed to the interaction router.
pub struct Listeners {
    pub received: broadcast::Receiver<DeliveredNotification>,
    pub responses: broadcast::Receiver<NotificationResponse>,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn current_permission(&self) -> Result<PermissionStatus>;

    async fn prompt_permission(&self) -> Result<PermissionStatus>;

    /// Deliver immediately. Returns the OS notification id, or `None` when
    /// nothing was handed to an OS facility.
    async fn deliver(&self, intent: &NotificationIntent) -> Result<Option<Uuid>>;

    /// `None` when the platform has nothing to listen to.
    fn listeners(&self) -> Option<Listeners>;
}

pub struct NativeSink {
    facility: Arc<dyn NotificationFacility>,
    sound: Option<String>,
}

impl NativeSink {
    pub fn new(facility: Arc<dyn NotificationFacility>, sound: Option<String>) -> Self {
        Self { facility, sound }
    }
}

#[async_trait]
impl NotificationSink for NativeSink {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn current_permission(&self) -> Result<PermissionStatus> {
        self.facility.get_permissions().await
    }

    async fn prompt_permission(&self) -> Result<PermissionStatus> {
        self.facility.request_permissions().await
    }

    async fn deliver(&self, intent: &NotificationIntent) -> Result<Option<Uuid>> {
        let request = intent.to_request(self.sound.as_deref())?;
        let id = self.facility.schedule(request).await?;
        debug!(%id, title = %intent.title, "Notification scheduled");
        Ok(Some(id))
    }

    fn listeners(&self) -> Option<Listeners> {
        Some(Listeners {
            received: self.facility.received_listener(),
            responses: self.facility.response_listener(),
        })
    }
}

/// Degraded-capability platforms: permission is vacuously granted and
/// delivery only logs. In-app banners are a UI concern.
pub struct NoopSink;

#[async_trait]
impl NotificationSink for NoopSink {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn current_permission(&self) -> Result<PermissionStatus> {
        Ok(PermissionStatus::Granted)
    }

    async fn prompt_permission(&self) -> Result<PermissionStatus> {
        Ok(PermissionStatus::Granted)
    }

    async fn deliver(&self, intent: &NotificationIntent) -> Result<Option<Uuid>> {
        debug!(
            title = %intent.title,
            resource = %intent.data.resource_class,
            "Web notification (not delivered)"
        );
        Ok(None)
    }

    fn listeners(&self) -> Option<Listeners> {
        None
    }
}

pub fn select_sink(
    platform: Platform,
    facility: Option<Arc<dyn NotificationFacility>>,
    sound: Option<String>,
) -> Arc<dyn NotificationSink> {
    match (platform, facility) {
        (Platform::Native, Some(facility)) => Arc::new(NativeSink::new(facility, sound)),
        (Platform::Native, None) => {
            warn!("Native platform configured without a notification facility, notifications disabled");
            Arc::new(NoopSink)
        }
        (Platform::Web, _) => Arc::new(NoopSink),
    }
}
