use std::collections::HashMap;
use std::sync::{Arc, Weak};

use growroom_api::Envelope;
use growroom_api::transport::decode;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Fans inbound events out to the listeners registered for their name.
///
/// The most recent payload per event name, and the most recent envelope
/// overall, are recorded on the same path before listeners run, so polling
/// consumers and listeners never disagree about what arrived.
#[derive(Default)]
pub struct Dispatcher {
    listeners: RwLock<HashMap<String, Vec<(Uuid, Listener)>>>,
    latest: RwLock<HashMap<String, Value>>,
    last: RwLock<Option<Envelope>>,
}

impl Dispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `callback` for `event`. Dropping the returned subscription
    /// removes exactly this callback.
    pub fn add_message_listener<F>(self: &Arc<Self>, event: &str, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.insert(event, id, Arc::new(callback));
        Subscription::new(self, event, id)
    }

    /// Registers `callback` for the next `event` only.
    pub fn once<F>(self: &Arc<Self>, event: &str, callback: F) -> Subscription
    where
        F: FnOnce(&Value) + Send + 'static,
    {
        self.once_where(event, |_| true, callback)
    }

    /// Registers `callback` for the next `event` whose payload satisfies
    /// `accept`. Payloads it rejects leave the listener in place.
    pub fn once_where<P, F>(self: &Arc<Self>, event: &str, accept: P, callback: F) -> Subscription
    where
        P: Fn(&Value) -> bool + Send + Sync + 'static,
        F: FnOnce(&Value) + Send + 'static,
    {
        let id = Uuid::new_v4();
        let slot = Mutex::new(Some(callback));
        let dispatcher = Arc::downgrade(self);
        let name = event.to_string();

        let listener: Listener = Arc::new(move |data| {
            if !accept(data) {
                return;
            }
            if let Some(callback) = slot.lock().take() {
                if let Some(dispatcher) = dispatcher.upgrade() {
                    dispatcher.remove(&name, id);
                }
                callback(data);
            }
        });

        self.insert(event, id, listener);
        Subscription::new(self, event, id)
    }

    /// Channel based variant of [`Dispatcher::add_message_listener`].
    pub fn subscribe(self: &Arc<Self>, event: &str) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.add_message_listener(event, move |data| {
            let _ = tx.send(data.clone());
        });

        EventStream {
            rx,
            _subscription: subscription,
        }
    }

    /// Decodes a text frame and dispatches it. Malformed frames are dropped.
    pub fn dispatch_frame(&self, frame: &str) -> usize {
        match decode(frame) {
            Ok(envelope) => self.dispatch(envelope),
            Err(e) => {
                tracing::warn!("Dropping inbound frame: {}", e);
                0
            }
        }
    }

    /// Delivers `envelope` to every listener of its event, returning how many ran.
    pub fn dispatch(&self, envelope: Envelope) -> usize {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .get(&envelope.event)
            .map(|entries| entries.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();

        self.latest
            .write()
            .insert(envelope.event.clone(), envelope.data.clone());
        *self.last.write() = Some(envelope.clone());

        tracing::debug!(
            event = %envelope.event,
            listeners = listeners.len(),
            "Dispatching inbound event"
        );

        for listener in &listeners {
            listener(&envelope.data);
        }

        listeners.len()
    }

    /// Most recent inbound envelope, whatever its name.
    pub fn last_message(&self) -> Option<Envelope> {
        self.last.read().clone()
    }

    /// Most recent payload received for `event`.
    pub fn latest(&self, event: &str) -> Option<Value> {
        self.latest.read().get(event).cloned()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.read().get(event).map_or(0, Vec::len)
    }

    fn insert(&self, event: &str, id: Uuid, listener: Listener) {
        self.listeners
            .write()
            .entry(event.to_string())
            .or_default()
            .push((id, listener));
    }

    fn contains(&self, event: &str, id: Uuid) -> bool {
        self.listeners
            .read()
            .get(event)
            .is_some_and(|entries| entries.iter().any(|(entry_id, _)| *entry_id == id))
    }

    fn remove(&self, event: &str, id: Uuid) -> bool {
        let mut listeners = self.listeners.write();
        let Some(entries) = listeners.get_mut(event) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        let removed = entries.len() != before;

        if entries.is_empty() {
            listeners.remove(event);
        }

        removed
    }
}

/// Scoped registration of one listener.
#[must_use = "dropping a Subscription removes its listener"]
pub struct Subscription {
    dispatcher: Weak<Dispatcher>,
    event: String,
    id: Uuid,
    active: bool,
}

impl Subscription {
    fn new(dispatcher: &Arc<Dispatcher>, event: &str, id: Uuid) -> Self {
        Self {
            dispatcher: Arc::downgrade(dispatcher),
            event: event.to_string(),
            id,
            active: true,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// Whether the listener is still registered. A fired `once` listener is not.
    pub fn is_registered(&self) -> bool {
        self.dispatcher
            .upgrade()
            .is_some_and(|dispatcher| dispatcher.contains(&self.event, self.id))
    }

    pub fn unsubscribe(self) {}

    /// Keeps the listener registered after this handle is dropped.
    pub fn detach(mut self) {
        self.active = false;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.active {
            return;
        }

        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.remove(&self.event, self.id);
        }
    }
}

/// Receiving end of [`Dispatcher::subscribe`].
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Value>,
    _subscription: Subscription,
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        self.rx.try_recv().ok()
    }
}
