//! Subscription manager: keeps exactly one change-feed subscription per
//! resource class open for the current identity, and none otherwise.
//!
//! Every subscription gets a forwarder task that tags its events with the
//! manager's generation. Closing bumps the generation before anything else,
//! so events still queued from old subscriptions are recognisably stale.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use horo_types::{
    identity::Identity,
    resource::{ChangeEvent, FeedEvent, ResourceClass},
};

use crate::events::{EventBus, RelayEvent};
use crate::feed::{ChangeFeed, FeedHandle, SubscriptionRequest};

#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEvent {
    pub generation: u64,
    pub event: ChangeEvent,
}

struct ActiveSubscription {
    resource: ResourceClass,
    handle: Box<dyn FeedHandle>,
    forwarder: JoinHandle<()>,
}

pub struct SubscriptionManager {
    feed: Arc<dyn ChangeFeed>,
    bus: EventBus,
    owner: Option<Identity>,
    active: Vec<ActiveSubscription>,
    generation: u64,
    events_tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl SubscriptionManager {
    /// Returns the manager and the receiver all subscriptions forward into.
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        bus: EventBus,
    ) -> (Self, mpsc::UnboundedReceiver<TaggedEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            feed,
            bus,
            owner: None,
            active: Vec::new(),
            generation: 0,
            events_tx,
        };
        (manager, events_rx)
    }

    pub fn owner(&self) -> Option<&Identity> {
        self.owner.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether an event came from a subscription that is still open.
    pub fn is_current(&self, tagged: &TaggedEvent) -> bool {
        tagged.generation == self.generation && self.owner.is_some()
    }

    pub fn open_resources(&self) -> Vec<ResourceClass> {
        self.active.iter().map(|sub| sub.resource).collect()
    }

    /// Close everything held for the previous identity, then open one
    /// subscription per resource class for `next`. A class whose subscribe
    /// call fails stays silent until the next identity change.
    pub async fn on_identity_changed(&mut self, next: Option<Identity>) {
        if self.owner == next {
            return;
        }
        self.close_all();

        let Some(owner) = next else {
            return;
        };
        self.owner = Some(owner.clone());

        for resource in ResourceClass::ALL {
            let request = SubscriptionRequest::for_owner(resource, &owner);
            match self.feed.subscribe(request).await {
                Ok(sub) => {
                    let forwarder =
                        forward(self.generation, resource, sub.events, self.events_tx.clone());
                    self.active.push(ActiveSubscription {
                        resource,
                        handle: sub.handle,
                        forwarder,
                    });
                    info!(%resource, user = %owner, "Subscribed to horoscope changes");
                    self.bus.send(RelayEvent::SubscriptionOpened {
                        resource,
                        identity: owner.clone(),
                    });
                }
                Err(e) => {
                    error!(%resource, user = %owner, "Failed to subscribe: {e}");
                    self.bus.send(RelayEvent::SubscriptionFailed {
                        resource,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    /// Close every open subscription. Returns how many were closed.
    pub fn close_all(&mut self) -> usize {
        self.generation += 1;
        let owner = self.owner.take();
        let count = self.active.len();
        for mut sub in self.active.drain(..) {
            sub.handle.close();
            sub.forwarder.abort();
        }
        if count > 0 {
            if let Some(owner) = owner {
                info!(user = %owner, "Closed {count} horoscope subscriptions");
            }
            self.bus.send(RelayEvent::SubscriptionsClosed { count });
        }
        count
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

fn forward(
    generation: u64,
    resource: ResourceClass,
    mut events: mpsc::UnboundedReceiver<FeedEvent>,
    tx: mpsc::UnboundedSender<TaggedEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!(%resource, operation = %event.operation, "Change feed event");
            let tagged = TaggedEvent {
                generation,
                event: ChangeEvent::new(resource, event),
            };
            if tx.send(tagged).is_err() {
                break;
            }
        }
    })
}
