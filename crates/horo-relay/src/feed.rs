//! Backend change-feed contract and an in-process implementation.
//!
//! A subscription is one realtime channel watching one horoscope table,
//! filtered server-side to rows owned by one user. Events arrive on an mpsc
//! receiver; the handle closes the channel.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use horo_types::{
    identity::Identity,
    resource::{ChangeOperation, FeedEvent, ResourceClass},
};

use crate::error::{RelayError, Result};

const SCHEMA: &str = "public";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub resource: ResourceClass,
    pub channel: String,
    pub schema: String,
    pub table: String,
    pub owner: Identity,
    /// Server-side row filter, e.g. `user_id=eq.<id>`.
    pub filter: String,
}

impl SubscriptionRequest {
    pub fn for_owner(resource: ResourceClass, owner: &Identity) -> Self {
        Self {
            resource,
            channel: resource.channel_name(),
            schema: SCHEMA.to_string(),
            table: resource.table().to_string(),
            owner: owner.clone(),
            filter: format!("user_id=eq.{owner}"),
        }
    }
}

/// Closes one open subscription.
pub trait FeedHandle: Send {
    fn close(&mut self);
}

pub struct FeedSubscription {
    pub handle: Box<dyn FeedHandle>,
    pub events: mpsc::UnboundedReceiver<FeedEvent>,
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, request: SubscriptionRequest) -> Result<FeedSubscription>;
}

// ─── In-process feed ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedLogEntry {
    Opened { table: String, owner: Identity },
    Closed { table: String, owner: Identity },
}

struct Slot {
    request: SubscriptionRequest,
    sender: Option<mpsc::UnboundedSender<FeedEvent>>,
    close_calls: usize,
}

#[derive(Default)]
struct FeedState {
    slots: Vec<Slot>,
    log: Vec<FeedLogEntry>,
    fail_next: HashSet<ResourceClass>,
}

/// Change feed living in the same process. Used by the CLI simulation and
/// by tests; keeps an ordered open/close log.
#[derive(Clone, Default)]
pub struct MemoryFeed {
    state: Arc<Mutex<FeedState>>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next subscribe call for `resource` fail with a transport error.
    pub fn fail_next(&self, resource: ResourceClass) {
        self.state.lock().unwrap().fail_next.insert(resource);
    }

    /// Push a row change to every open subscription matching the table and
    /// owner. Returns how many subscriptions received it.
    pub fn publish(
        &self,
        resource: ResourceClass,
        owner: &Identity,
        operation: ChangeOperation,
        payload: Value,
    ) -> usize {
        let state = self.state.lock().unwrap();
        let mut delivered = 0;
        for slot in &state.slots {
            if slot.request.resource != resource || &slot.request.owner != owner {
                continue;
            }
            if let Some(sender) = &slot.sender {
                let event = FeedEvent {
                    operation,
                    payload: payload.clone(),
                };
                if sender.send(event).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Currently open subscriptions as (class, owner) pairs.
    pub fn open_subscriptions(&self) -> Vec<(ResourceClass, Identity)> {
        self.state
            .lock()
            .unwrap()
            .slots
            .iter()
            .filter(|slot| slot.sender.is_some())
            .map(|slot| (slot.request.resource, slot.request.owner.clone()))
            .collect()
    }

    /// Every request ever accepted, in order.
    pub fn requests(&self) -> Vec<SubscriptionRequest> {
        self.state
            .lock()
            .unwrap()
            .slots
            .iter()
            .map(|slot| slot.request.clone())
            .collect()
    }

    /// How many times `close()` was called on each handle, in open order.
    pub fn close_counts(&self) -> Vec<usize> {
        self.state
            .lock()
            .unwrap()
            .slots
            .iter()
            .map(|slot| slot.close_calls)
            .collect()
    }

    pub fn log(&self) -> Vec<FeedLogEntry> {
        self.state.lock().unwrap().log.clone()
    }
}

#[async_trait]
impl ChangeFeed for MemoryFeed {
    async fn subscribe(&self, request: SubscriptionRequest) -> Result<FeedSubscription> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next.remove(&request.resource) {
            return Err(RelayError::SubscribeFailed {
                table: request.table,
                reason: "channel error".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.log.push(FeedLogEntry::Opened {
            table: request.table.clone(),
            owner: request.owner.clone(),
        });
        debug!(channel = %request.channel, filter = %request.filter, "Channel joined");
        state.slots.push(Slot {
            request,
            sender: Some(tx),
            close_calls: 0,
        });
        let index = state.slots.len() - 1;

        Ok(FeedSubscription {
            handle: Box::new(MemoryHandle {
                index,
                state: Arc::clone(&self.state),
            }),
            events: rx,
        })
    }
}

struct MemoryHandle {
    index: usize,
    state: Arc<Mutex<FeedState>>,
}

impl FeedHandle for MemoryHandle {
    fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        let slot = &mut state.slots[self.index];
        slot.close_calls += 1;
        if slot.sender.take().is_some() {
            let entry = FeedLogEntry::Closed {
                table: slot.request.table.clone(),
                owner: slot.request.owner.clone(),
            };
            state.log.push(entry);
        }
    }
}
