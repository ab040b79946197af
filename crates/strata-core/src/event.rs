//! Named events and the subscription abstraction.
//!
//! Completion detection never touches transport internals directly; it only
//! subscribes to and unsubscribes from named events through the [`Emitter`]
//! trait. [`EventEmitter`] is the in-process implementation used by the
//! exchange types.

use crate::error::Error;
use crate::finished::Channel;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Events emitted by messages and channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// An incoming message body has been fully consumed.
    End,
    /// An outgoing message has been completely handed to the transport.
    Finish,
    /// A channel was closed.
    Close,
    /// A channel failed. The payload carries the error.
    Error,
    /// A message was assigned a channel. The payload carries the channel.
    Socket,
}

impl Event {
    /// Returns the lowercase event name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::End => "end",
            Self::Finish => "finish",
            Self::Close => "close",
            Self::Error => "error",
            Self::Socket => "socket",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data delivered with an event.
#[derive(Clone, Default)]
pub enum Payload {
    /// No data.
    #[default]
    Empty,
    /// An error, delivered with [`Event::Error`].
    Error(Error),
    /// A channel, delivered with [`Event::Socket`].
    Channel(Arc<dyn Channel>),
}

impl Payload {
    /// Returns the carried error, if any.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        match self {
            Self::Error(err) => Some(Arc::clone(err)),
            _ => None,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Error(err) => f.debug_tuple("Error").field(err).finish(),
            Self::Channel(_) => f.write_str("Channel(..)"),
        }
    }
}

/// Identifies one subscription on an emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A subscribed event listener.
pub type Listener = Arc<dyn Fn(&Payload) + Send + Sync>;

/// Something listeners can be attached to and detached from by event name.
pub trait Emitter: Send + Sync {
    /// Attaches a listener and returns the id needed to detach it.
    fn subscribe(&self, event: Event, listener: Listener) -> ListenerId;

    /// Detaches a listener. Returns `false` if it was not attached.
    fn unsubscribe(&self, event: Event, id: ListenerId) -> bool;

    /// Number of listeners currently attached for `event`.
    fn listener_count(&self, event: Event) -> usize;
}

/// In-process event emitter.
///
/// Cloning yields another handle to the same listener table. Listeners are
/// invoked in subscription order, outside the table lock, against a snapshot
/// taken when the event was emitted: a listener detached while an emission is
/// in progress is still called for that emission.
#[derive(Clone, Default)]
pub struct EventEmitter {
    inner: Arc<EmitterInner>,
}

#[derive(Default)]
struct EmitterInner {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<Event, Vec<(ListenerId, Listener)>>>,
}

impl EventEmitter {
    /// Creates an emitter with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a closure as a listener.
    pub fn on<F>(&self, event: Event, listener: F) -> ListenerId
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.subscribe(event, Arc::new(listener))
    }

    /// Emits an event. Returns `true` if any listener was called.
    pub fn emit(&self, event: Event, payload: &Payload) -> bool {
        let snapshot: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .get(&event)
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in &snapshot {
            listener(payload);
        }
        !snapshot.is_empty()
    }

    /// Total number of listeners across every event.
    #[must_use]
    pub fn total_listeners(&self) -> usize {
        self.inner.listeners.lock().values().map(Vec::len).sum()
    }

    /// Returns `true` if both handles share one listener table.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Emitter for EventEmitter {
    fn subscribe(&self, event: Event, listener: Listener) -> ListenerId {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .listeners
            .lock()
            .entry(event)
            .or_default()
            .push((id, listener));
        id
    }

    fn unsubscribe(&self, event: Event, id: ListenerId) -> bool {
        let mut table = self.inner.listeners.lock();
        let Some(entries) = table.get_mut(&event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            table.remove(&event);
        }
        removed
    }

    fn listener_count(&self, event: Event) -> usize {
        self.inner.listeners.lock().get(&event).map_or(0, Vec::len)
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.total_listeners())
            .finish()
    }
}
