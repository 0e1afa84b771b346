//! Host event bus capabilities consumed by the bridge.
//!
//! The host application delivers every CoT event it sees to subscribers, in
//! subscription order, as one mutable event. A subscriber may annotate the
//! event (the bridge adds its loop marker) and later subscribers see the
//! annotation. [`MemoryHostBus`] is a complete in-process implementation
//! used by the CLI and tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use lorabridge_core::{Directory, DirectoryError};
use lorabridge_types::{CotEvent, EventClass};

/// Receives events from the host bus.
#[async_trait]
pub trait HostEventHandler: Send + Sync {
    /// Handle one event. Changes made to `event` are visible to later
    /// subscribers.
    async fn on_event(&self, event: &mut CotEvent);
}

/// Which events a subscription receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    /// Every event.
    All,
    /// Events of one class.
    Class(EventClass),
}

impl EventFilter {
    /// Whether `event` passes this filter.
    pub fn matches(&self, event: &CotEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Class(class) => event.class() == *class,
        }
    }
}

/// Handle to a live subscription.
///
/// Dropping the handle does not cancel; call [`Subscription::cancel`].
pub struct Subscription {
    id: u64,
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Subscription {
    /// Wrap a cancellation callback.
    pub fn new(id: u64, cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Subscription id, unique per bus.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop receiving events.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// The host application's event bus.
#[async_trait]
pub trait HostBus: Send + Sync {
    /// Register a handler for events passing `filter`.
    fn subscribe(&self, filter: EventFilter, handler: Arc<dyn HostEventHandler>) -> Subscription;

    /// Deliver an event to every matching subscriber.
    async fn publish(&self, event: CotEvent);

    /// Device uid of the local host.
    fn local_uid(&self) -> String;
}

type Subscribers = RwLock<BTreeMap<u64, (EventFilter, Arc<dyn HostEventHandler>)>>;

/// In-process host bus with a contact directory.
pub struct MemoryHostBus {
    local_uid: String,
    subscribers: Arc<Subscribers>,
    next_id: AtomicU64,
    contacts: DashMap<String, String>,
}

impl std::fmt::Debug for MemoryHostBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHostBus")
            .field("local_uid", &self.local_uid)
            .field("subscribers", &self.subscriber_count())
            .field("contacts", &self.contacts.len())
            .finish()
    }
}

impl MemoryHostBus {
    /// Create a bus for the device `local_uid`.
    pub fn new(local_uid: impl Into<String>) -> Self {
        Self {
            local_uid: local_uid.into(),
            subscribers: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: AtomicU64::new(1),
            contacts: DashMap::new(),
        }
    }

    /// Record a contact's display name.
    pub fn add_contact(&self, uid: impl Into<String>, callsign: impl Into<String>) {
        self.contacts.insert(uid.into(), callsign.into());
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl HostBus for MemoryHostBus {
    fn subscribe(&self, filter: EventFilter, handler: Arc<dyn HostEventHandler>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, (filter, handler));

        let subscribers: Weak<Subscribers> = Arc::downgrade(&self.subscribers);
        Subscription::new(id, move || {
            if let Some(subscribers) = subscribers.upgrade() {
                subscribers
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&id);
            }
        })
    }

    async fn publish(&self, mut event: CotEvent) {
        let targets: Vec<Arc<dyn HostEventHandler>> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|(filter, _)| filter.matches(&event))
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in targets {
            handler.on_event(&mut event).await;
        }
    }

    fn local_uid(&self) -> String {
        self.local_uid.clone()
    }
}

impl Directory for MemoryHostBus {
    fn display_name(&self, uid: &str) -> Result<Option<String>, DirectoryError> {
        Ok(self.contacts.get(uid).map(|name| name.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorabridge_types::DetailNode;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<CotEvent>>);

    #[async_trait]
    impl HostEventHandler for Recorder {
        async fn on_event(&self, event: &mut CotEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    struct Annotator;

    #[async_trait]
    impl HostEventHandler for Annotator {
        async fn on_event(&self, event: &mut CotEvent) {
            event.detail.add_child(DetailNode::new("seen"));
        }
    }

    #[tokio::test]
    async fn later_subscribers_see_annotations() {
        let bus = MemoryHostBus::new("dev-1");
        let recorder = Arc::new(Recorder::default());
        let _a = bus.subscribe(EventFilter::All, Arc::new(Annotator));
        let _r = bus.subscribe(EventFilter::All, recorder.clone());

        bus.publish(CotEvent::new("u1", "a-f-G", "T")).await;

        let seen = recorder.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].detail.child("seen").is_some());
    }

    #[tokio::test]
    async fn filter_by_class() {
        let bus = MemoryHostBus::new("dev-1");
        let chats = Arc::new(Recorder::default());
        let _s = bus.subscribe(EventFilter::Class(EventClass::Chat), chats.clone());

        bus.publish(CotEvent::new("u1", "a-f-G", "T")).await;
        bus.publish(CotEvent::new("u2", "b-t-f", "T")).await;

        let seen = chats.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].uid, "u2");
    }

    #[tokio::test]
    async fn cancel_stops_delivery() {
        let bus = MemoryHostBus::new("dev-1");
        let recorder = Arc::new(Recorder::default());
        let sub = bus.subscribe(EventFilter::All, recorder.clone());
        assert_eq!(bus.subscriber_count(), 1);

        sub.cancel();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(CotEvent::new("u1", "a-f-G", "T")).await;
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[test]
    fn directory_lookup() {
        let bus = MemoryHostBus::new("dev-1");
        bus.add_contact("dev-2", "BRAVO");
        assert_eq!(bus.display_name("dev-2").unwrap(), Some("BRAVO".to_string()));
        assert_eq!(bus.display_name("dev-3").unwrap(), None);
        assert_eq!(bus.local_uid(), "dev-1");
    }
}
