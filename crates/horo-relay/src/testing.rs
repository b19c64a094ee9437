//! Test doubles shared by the unit tests in this crate.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use horo_types::notification::{
    DeliveredNotification, NotificationContent, NotificationRequest, NotificationResponse,
    PermissionStatus, DEFAULT_ACTION,
};

use crate::error::{RelayError, Result};
use crate::sink::NotificationFacility;

/// Notification facility that records what it was asked to do.
pub(crate) struct RecordingFacility {
    status: Mutex<PermissionStatus>,
    prompt_answer: Mutex<PermissionStatus>,
    prompts: AtomicUsize,
    fail_schedule: AtomicBool,
    scheduled: Mutex<Vec<NotificationRequest>>,
    received: broadcast::Sender<DeliveredNotification>,
    responses: broadcast::Sender<NotificationResponse>,
}

impl RecordingFacility {
    fn with_status(status: PermissionStatus, prompt_answer: PermissionStatus) -> Self {
        let (received, _) = broadcast::channel(16);
        let (responses, _) = broadcast::channel(16);
        Self {
            status: Mutex::new(status),
            prompt_answer: Mutex::new(prompt_answer),
            prompts: AtomicUsize::new(0),
            fail_schedule: AtomicBool::new(false),
            scheduled: Mutex::new(Vec::new()),
            received,
            responses,
        }
    }

    /// Permission already granted at the OS level.
    pub(crate) fn granted() -> Self {
        Self::with_status(PermissionStatus::Granted, PermissionStatus::Granted)
    }

    /// Permission undetermined; the prompt answers with `answer`.
    pub(crate) fn prompting(answer: PermissionStatus) -> Self {
        Self::with_status(PermissionStatus::Undetermined, answer)
    }

    pub(crate) fn set_prompt_answer(&self, answer: PermissionStatus) {
        *self.prompt_answer.lock().unwrap() = answer;
    }

    pub(crate) fn set_fail_schedule(&self, fail: bool) {
        self.fail_schedule.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    pub(crate) fn scheduled(&self) -> Vec<NotificationRequest> {
        self.scheduled.lock().unwrap().clone()
    }

    /// Simulate the user tapping a notification carrying `data`.
    pub(crate) fn tap(&self, data: Value) {
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
impl NotificationFacility for RecordingFacility {
    async fn get_permissions(&self) -> Result<PermissionStatus> {
        Ok(*self.status.lock().unwrap())
    }

    async fn request_permissions(&self) -> Result<PermissionStatus> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        let answer = *self.prompt_answer.lock().unwrap();
        *self.status.lock().unwrap() = answer;
        Ok(answer)
    }

    async fn schedule(&self, request: NotificationRequest) -> Result<Uuid> {
        if self.fail_schedule.load(Ordering::SeqCst) {
            return Err(RelayError::Facility("scheduling rejected".into()));
        }
        self.scheduled.lock().unwrap().push(request.clone());
        let delivered = DeliveredNotification {
            id: Uuid::new_v4(),
            content: request.content,
            delivered_at: Utc::now(),
        };
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
