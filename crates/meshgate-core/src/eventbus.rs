//! Event bus for gateway notifications.
//!
//! The ingestion pipeline, the command dispatcher and the maintenance flows
//! publish [`GatewayEvent`]s here; consumers subscribe to all of them or to a
//! filtered subset.
//!
//! Delivery is lossless: every subscriber owns an unbounded queue and gets
//! every event published after it subscribed, in publish order. A slow
//! subscriber grows its own backlog and never costs another subscriber
//! anything. Once the backlog reaches the bus capacity a warning is logged.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::event::{EventMetadata, GatewayEvent};
use crate::types::DeviceId;

/// Default backlog at which a subscriber is reported as falling behind.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

type Envelope = (GatewayEvent, EventMetadata);

/// Plain predicate used by the built-in filters.
pub type EventPredicate = fn(&GatewayEvent) -> bool;

struct Subscriber {
    tx: mpsc::UnboundedSender<Envelope>,
    backlog: Arc<AtomicUsize>,
}

/// Event bus for the gateway.
///
/// Clones share the same subscribers. Receivers see the bus close once the
/// last clone is dropped and their queue is drained.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    capacity: usize,
    name: String,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with the specified capacity.
    ///
    /// The capacity is the per-subscriber backlog that triggers a
    /// falling-behind warning. Nothing is dropped when it is exceeded.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            name: "default".to_string(),
        }
    }

    /// Create a new event bus with a name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self::new().named(name)
    }

    /// Rename this bus, keeping its capacity.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| !s.tx.is_closed());
        subscribers.len()
    }

    /// Publish an event with default metadata.
    ///
    /// Returns `true` if there was at least one subscriber.
    pub fn publish(&self, event: GatewayEvent) -> bool {
        self.publish_with_source(event, "gateway")
    }

    /// Publish an event with a custom source.
    pub fn publish_with_source(&self, event: GatewayEvent, source: impl Into<String>) -> bool {
        self.publish_with_metadata(event, EventMetadata::new(source))
    }

    /// Publish an event with custom metadata.
    pub fn publish_with_metadata(&self, event: GatewayEvent, metadata: EventMetadata) -> bool {
        // Held across the whole fan-out so every subscriber sees one order.
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| !s.tx.is_closed());

        let mut delivered = false;
        for subscriber in subscribers.iter() {
            let backlog = subscriber.backlog.fetch_add(1, Ordering::Relaxed) + 1;
            if subscriber.tx.send((event.clone(), metadata.clone())).is_err() {
                subscriber.backlog.fetch_sub(1, Ordering::Relaxed);
                continue;
            }
            delivered = true;
            if backlog == self.capacity {
                tracing::warn!(bus = %self.name, backlog, "Event subscriber is falling behind");
            }
        }
        delivered
    }

    fn attach(&self) -> Inbox {
        let (tx, rx) = mpsc::unbounded_channel();
        let backlog = Arc::new(AtomicUsize::new(0));
        self.subscribers.lock().push(Subscriber {
            tx,
            backlog: backlog.clone(),
        });
        Inbox { rx, backlog }
    }

    /// Subscribe to all events.
    pub fn subscribe(&self) -> EventBusReceiver {
        EventBusReceiver {
            inbox: self.attach(),
        }
    }

    /// Subscribe to events matching a filter.
    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&GatewayEvent) -> bool + Send + 'static,
    {
        FilteredReceiver::new(self.attach(), filter)
    }

    /// Create a filtered subscription helper for common patterns.
    pub fn filter(&self) -> FilterBuilder {
        FilterBuilder { bus: self.clone() }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's queue and its backlog counter.
struct Inbox {
    rx: mpsc::UnboundedReceiver<Envelope>,
    backlog: Arc<AtomicUsize>,
}

impl Inbox {
    fn taken(&self, envelope: Option<Envelope>) -> Option<Envelope> {
        if envelope.is_some() {
            self.backlog.fetch_sub(1, Ordering::Relaxed);
        }
        envelope
    }

    async fn recv(&mut self) -> Option<Envelope> {
        let envelope = self.rx.recv().await;
        self.taken(envelope)
    }

    fn try_recv(&mut self) -> Option<Envelope> {
        let envelope = self.rx.try_recv().ok();
        self.taken(envelope)
    }
}

/// Receiver for all events from the event bus.
pub struct EventBusReceiver {
    inbox: Inbox,
}

impl EventBusReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` once every bus handle is gone and the queue is empty.
    pub async fn recv(&mut self) -> Option<(GatewayEvent, EventMetadata)> {
        self.inbox.recv().await
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&mut self) -> Option<(GatewayEvent, EventMetadata)> {
        self.inbox.try_recv()
    }

    /// Events published to this receiver and not yet received.
    pub fn backlog(&self) -> usize {
        self.inbox.backlog.load(Ordering::Relaxed)
    }
}

/// Receiver for filtered events from the event bus.
pub struct FilteredReceiver<F>
where
    F: Fn(&GatewayEvent) -> bool + Send,
{
    inbox: Inbox,
    filter: F,
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&GatewayEvent) -> bool + Send,
{
    fn new(inbox: Inbox, filter: F) -> Self {
        Self { inbox, filter }
    }

    /// Receive the next event matching the filter.
    ///
    /// Returns `None` if the event bus is closed.
    pub async fn recv(&mut self) -> Option<(GatewayEvent, EventMetadata)> {
        while let Some((event, meta)) = self.inbox.recv().await {
            if (self.filter)(&event) {
                return Some((event, meta));
            }
        }
        None
    }

    /// Try to receive a matching event without blocking.
    pub fn try_recv(&mut self) -> Option<(GatewayEvent, EventMetadata)> {
        while let Some((event, meta)) = self.inbox.try_recv() {
            if (self.filter)(&event) {
                return Some((event, meta));
            }
        }
        None
    }

    /// Events queued for this receiver, matching or not.
    pub fn backlog(&self) -> usize {
        self.inbox.backlog.load(Ordering::Relaxed)
    }
}

/// Builder for creating filtered subscriptions.
pub struct FilterBuilder {
    bus: EventBus,
}

impl FilterBuilder {
    /// Subscribe to state-change events only.
    pub fn state_events(&self) -> FilteredReceiver<EventPredicate> {
        self.bus
            .subscribe_filtered(GatewayEvent::is_state_event as EventPredicate)
    }

    /// Subscribe to command completion events only.
    pub fn command_events(&self) -> FilteredReceiver<EventPredicate> {
        self.bus
            .subscribe_filtered(GatewayEvent::is_command_event as EventPredicate)
    }

    /// Subscribe to join and clock-sync events only.
    pub fn lifecycle_events(&self) -> FilteredReceiver<EventPredicate> {
        self.bus
            .subscribe_filtered(GatewayEvent::is_lifecycle_event as EventPredicate)
    }

    /// Subscribe to every event concerning one device.
    pub fn device(
        &self,
        device_id: impl Into<DeviceId>,
    ) -> FilteredReceiver<impl Fn(&GatewayEvent) -> bool + Send + 'static> {
        let target = device_id.into();
        self.bus
            .subscribe_filtered(move |event: &GatewayEvent| event.device_id() == &target)
    }

    /// Subscribe with a custom filter function.
    pub fn custom<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&GatewayEvent) -> bool + Send + 'static,
    {
        self.bus.subscribe_filtered(filter)
    }
}

/// Shared event bus handle.
pub type SharedEventBus = Arc<EventBus>;
