//! First-event-wins aggregation across several emitters.
//!
//! [`first`] subscribes one listener per `(emitter, event)` pair. The first
//! event to fire detaches every listener of the registration and then invokes
//! the callback, exactly once, even when events race on different threads.
//!
//! ```
//! use std::sync::Arc;
//! use strata_core::{first, Event, EventEmitter, EventGroup, Payload};
//!
//! let socket = EventEmitter::new();
//! let handle = first(
//!     vec![EventGroup::new(Arc::new(socket.clone()), [Event::Close, Event::Error])],
//!     |fired| assert_eq!(fired.event, Event::Close),
//! )
//! .unwrap();
//!
//! socket.emit(Event::Close, &Payload::Empty);
//! assert!(handle.is_settled());
//! assert_eq!(socket.total_listeners(), 0);
//! ```

use crate::error::{Error, StrataError, StrataResult};
use crate::event::{Emitter, Event, ListenerId, Payload};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// One emitter and the events to watch on it.
pub struct EventGroup {
    emitter: Arc<dyn Emitter>,
    events: Vec<Event>,
}

impl EventGroup {
    /// Creates a group.
    pub fn new(emitter: Arc<dyn Emitter>, events: impl IntoIterator<Item = Event>) -> Self {
        Self {
            emitter,
            events: events.into_iter().collect(),
        }
    }
}

/// Describes the event that settled a registration.
pub struct Fired {
    /// The error carried by an [`Event::Error`], otherwise `None`.
    pub error: Option<Error>,
    /// The emitter that fired.
    pub emitter: Arc<dyn Emitter>,
    /// Index of the group the emitter was given in.
    pub group: usize,
    /// The event that fired.
    pub event: Event,
    /// The payload the event was emitted with.
    pub payload: Payload,
}

impl fmt::Debug for Fired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fired")
            .field("error", &self.error)
            .field("group", &self.group)
            .field("event", &self.event)
            .finish_non_exhaustive()
    }
}

type FiredCallback = Box<dyn FnOnce(Fired) + Send>;

struct Registration {
    emitter: Arc<dyn Emitter>,
    event: Event,
    id: ListenerId,
}

#[derive(Default)]
struct State {
    callback: Option<FiredCallback>,
    registrations: Vec<Registration>,
    settled: bool,
}

struct Shared {
    state: Mutex<State>,
}

impl Shared {
    fn settle(&self, fired: Fired) {
        let (callback, registrations) = {
            let mut state = self.state.lock();
            if state.settled {
                return;
            }
            state.settled = true;
            (
                state.callback.take(),
                std::mem::take(&mut state.registrations),
            )
        };

        detach(registrations);
        if let Some(callback) = callback {
            callback(fired);
        }
    }
}

fn detach(registrations: Vec<Registration>) {
    for reg in registrations {
        reg.emitter.unsubscribe(reg.event, reg.id);
    }
}

/// Handle to a pending [`first`] registration.
///
/// Until the registration settles its listeners keep it alive; dropping the
/// handle does not cancel it.
#[derive(Clone)]
pub struct FirstHandle {
    shared: Arc<Shared>,
}

impl FirstHandle {
    /// Detaches every listener and discards the callback.
    ///
    /// Does nothing once the registration has settled.
    pub fn cancel(&self) {
        let registrations = {
            let mut state = self.shared.state.lock();
            if state.settled {
                return;
            }
            state.settled = true;
            state.callback = None;
            std::mem::take(&mut state.registrations)
        };
        detach(registrations);
    }

    /// Replaces the callback that will run when an event fires.
    ///
    /// Ignored once the registration has settled.
    pub fn replace_callback<F>(&self, callback: F)
    where
        F: FnOnce(Fired) + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        if !state.settled {
            state.callback = Some(Box::new(callback));
        }
    }

    /// Returns `true` once an event has fired or the registration was cancelled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.shared.state.lock().settled
    }

    /// Number of listeners still attached by this registration.
    #[must_use]
    pub fn attached(&self) -> usize {
        self.shared.state.lock().registrations.len()
    }
}

impl fmt::Debug for FirstHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("FirstHandle")
            .field("settled", &state.settled)
            .field("attached", &state.registrations.len())
            .finish()
    }
}

/// Waits for the first of several events across several emitters.
///
/// # Errors
///
/// Returns [`StrataError::InvalidArgument`] if any group names no events.
pub fn first<F>(groups: Vec<EventGroup>, callback: F) -> StrataResult<FirstHandle>
where
    F: FnOnce(Fired) + Send + 'static,
{
    if let Some(index) = groups.iter().position(|g| g.events.is_empty()) {
        return Err(StrataError::invalid_argument(format!(
            "event group {index} must name at least one event"
        )));
    }
    Ok(install(groups, callback))
}

/// Installs a registration without validating the groups.
pub(crate) fn install<F>(groups: Vec<EventGroup>, callback: F) -> FirstHandle
where
    F: FnOnce(Fired) + Send + 'static,
{
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            callback: Some(Box::new(callback)),
            ..State::default()
        }),
    });

    for (group, EventGroup { emitter, events }) in groups.into_iter().enumerate() {
        for event in events {
            let listener = {
                let shared = Arc::clone(&shared);
                let emitter = Arc::clone(&emitter);
                Arc::new(move |payload: &Payload| {
                    let error = match event {
                        Event::Error => payload.error(),
                        _ => None,
                    };
                    shared.settle(Fired {
                        error,
                        emitter: Arc::clone(&emitter),
                        group,
                        event,
                        payload: payload.clone(),
                    });
                })
            };
            let id = emitter.subscribe(event, listener);

            let mut state = shared.state.lock();
            if state.settled {
                // another thread won while we were still subscribing
                drop(state);
                emitter.unsubscribe(event, id);
            } else {
                state.registrations.push(Registration {
                    emitter: Arc::clone(&emitter),
                    event,
                    id,
                });
            }
        }
    }

    FirstHandle { shared }
}
