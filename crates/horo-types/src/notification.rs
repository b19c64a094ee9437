use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::resource::ResourceClass;

/// Structured payload attached to every horoscope notification. Handed back
/// verbatim when the user taps the notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    pub resource_class: ResourceClass,
    pub payload: Value,
}

impl NotificationData {
    /// Recover the structured payload from a delivered notification's data.
    /// Returns `None` for notifications this app did not produce.
    pub fn from_value(data: &Value) -> Option<Self> {
        serde_json::from_value(data.clone()).ok()
    }
}

/// A mapped, ready-to-dispatch notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationIntent {
    pub title: String,
    pub body: String,
    pub data: NotificationData,
}

impl NotificationIntent {
    /// Build the OS-facing request. The trigger is always `None`: delivery
    /// is immediate.
    pub fn to_request(&self, sound: Option<&str>) -> serde_json::Result<NotificationRequest> {
        Ok(NotificationRequest {
            content: NotificationContent {
                title: self.title.clone(),
                body: self.body.clone(),
                data: serde_json::to_value(&self.data)?,
                sound: sound.map(str::to_string),
            },
            trigger: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationContent {
    pub title: String,
    pub body: String,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
}

/// What gets handed to the OS notification facility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub content: NotificationContent,
    /// `None` means deliver now.
    pub trigger: Option<DateTime<Utc>>,
}

/// A notification the OS has presented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveredNotification {
    pub id: Uuid,
    pub content: NotificationContent,
    pub delivered_at: DateTime<Utc>,
}

/// The user interacted with a delivered notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationResponse {
    pub notification: DeliveredNotification,
    pub action: String,
}

/// Action identifier the OS reports for a plain tap.
pub const DEFAULT_ACTION: &str = "default";

/// Permission as reported by the OS facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    Granted,
    Denied,
    Undetermined,
}

impl PermissionStatus {
    pub fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Cached permission outcome for the current process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    #[default]
    Unknown,
    Granted,
    Denied,
}

impl PermissionState {
    pub fn is_resolved(self) -> bool {
        !matches!(self, Self::Unknown)
    }

    pub fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

impl From<PermissionStatus> for PermissionState {
    fn from(status: PermissionStatus) -> Self {
        match status {
            PermissionStatus::Granted => Self::Granted,
            // A prompt that was dismissed without an answer counts as a refusal.
            PermissionStatus::Denied | PermissionStatus::Undetermined => Self::Denied,
        }
    }
}

impl std::fmt::Display for PermissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Granted => write!(f, "granted"),
            Self::Denied => write!(f, "denied"),
        }
    }
}
