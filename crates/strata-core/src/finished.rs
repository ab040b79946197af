//! Completion detection for request/response exchanges.
//!
//! An exchange can end in several ways that race each other: the message
//! completes normally (`End` on a request, `Finish` on a response), the
//! underlying channel closes or fails, or the request is upgraded to another
//! protocol. [`on_finished`] reports whichever comes first, exactly once.
//!
//! Each subject keeps at most one active listener set in its
//! [`CompletionSlot`]. Further callbacks registered while the set is pending
//! are queued on it, so four hundred observers of one response cost one set
//! of transport listeners rather than four hundred.

use crate::error::Error;
use crate::event::{Emitter, Event, ListenerId, Payload};
use crate::first::{install, EventGroup, FirstHandle};
use crate::schedule::defer;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// The completion-relevant state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    /// A message being written to the peer.
    Outgoing {
        /// The message has been completely handed to the transport.
        finished: bool,
    },
    /// A message being read from the peer.
    Incoming {
        /// The transport has delivered the whole body.
        complete: bool,
        /// The body has not yet been consumed to its end.
        readable: bool,
        /// The exchange was upgraded to another protocol.
        upgrade: bool,
    },
    /// Neither shape; completion cannot be determined.
    Unknown,
}

/// A transport connection as seen by completion detection.
pub trait Channel: Send + Sync {
    /// The peer may still send data.
    fn is_readable(&self) -> bool;

    /// Data may still be written to the peer.
    fn is_writable(&self) -> bool;

    /// Tears the connection down, emitting [`Event::Close`] once.
    fn destroy(&self);

    /// Emitter for the channel's [`Event::Error`] and [`Event::Close`].
    fn emitter(&self) -> Arc<dyn Emitter>;
}

/// A message whose completion can be observed.
pub trait Subject: Send + Sync {
    /// Current state of the message.
    fn message_state(&self) -> MessageState;

    /// The channel the message travels over, once assigned.
    fn channel(&self) -> Option<Arc<dyn Channel>>;

    /// Emitter for the message's own events.
    fn emitter(&self) -> Arc<dyn Emitter>;

    /// Per-subject bookkeeping used by [`on_finished`].
    fn completion(&self) -> &CompletionSlot;
}

type Queued = Box<dyn FnOnce(Option<Error>) + Send>;

struct Attached {
    queue: Mutex<Option<Vec<Queued>>>,
}

impl Attached {
    fn resolve(self: &Arc<Self>, slot: &CompletionSlot, error: Option<Error>) {
        {
            let mut active = slot.active.lock();
            if active.as_ref().is_some_and(|a| Arc::ptr_eq(a, self)) {
                *active = None;
            }
        }

        let queue = self.queue.lock().take().unwrap_or_default();
        for callback in queue {
            callback(error.clone());
        }
    }
}

/// Holds a subject's active completion listener set, if any.
#[derive(Default)]
pub struct CompletionSlot {
    active: Mutex<Option<Arc<Attached>>>,
}

impl CompletionSlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` while a listener set is attached and unresolved.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Number of callbacks queued on the active listener set.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.active
            .lock()
            .as_ref()
            .and_then(|a| a.queue.lock().as_ref().map(Vec::len))
            .unwrap_or(0)
    }

    fn is_active(&self, attached: &Arc<Attached>) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|a| Arc::ptr_eq(a, attached))
    }
}

impl fmt::Debug for CompletionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSlot")
            .field("pending", &self.is_pending())
            .field("queued", &self.queued())
            .finish()
    }
}

/// Reports whether a subject's exchange has already reached a terminal state.
///
/// Returns `None` when the subject is neither an incoming nor an outgoing
/// message.
pub fn is_finished<S: Subject + ?Sized>(subject: &S) -> Option<bool> {
    let channel = subject.channel();
    match subject.message_state() {
        MessageState::Outgoing { finished } => {
            Some(finished || channel.is_some_and(|c| !c.is_writable()))
        }
        MessageState::Incoming {
            complete,
            readable,
            upgrade,
        } => Some(
            upgrade
                || channel.map_or(true, |c| !c.is_readable())
                || (complete && !readable),
        ),
        MessageState::Unknown => None,
    }
}

/// Invokes `callback` once the subject's exchange reaches a terminal state.
///
/// If the exchange is already finished, or its state cannot be determined,
/// the callback is deferred to the next scheduling turn with no error.
/// Otherwise it receives the error of a failing channel, or `None` for any
/// other terminal event. Callbacks registered on the same subject run in
/// registration order.
pub fn on_finished<S, F>(subject: &S, callback: F)
where
    S: Subject + Clone + 'static,
    F: FnOnce(Option<Error>, S) + Send + 'static,
{
    let owned = subject.clone();
    if is_finished(subject) != Some(false) {
        defer(move || callback(None, owned));
        return;
    }
    attach(subject, Box::new(move |error| callback(error, owned)));
}

fn attach<S>(subject: &S, queued: Queued)
where
    S: Subject + Clone + 'static,
{
    let mut slot = subject.completion().active.lock();
    if let Some(attached) = slot.as_ref() {
        if let Some(queue) = attached.queue.lock().as_mut() {
            queue.push(queued);
            return;
        }
    }

    let attached = Arc::new(Attached {
        queue: Mutex::new(Some(vec![queued])),
    });
    *slot = Some(Arc::clone(&attached));
    drop(slot);

    arm(subject, attached);
}

#[derive(Default)]
struct Watch {
    finished: bool,
    message: Option<FirstHandle>,
    channel: Option<FirstHandle>,
    socket_listener: Option<ListenerId>,
}

fn arm<S>(subject: &S, attached: Arc<Attached>)
where
    S: Subject + Clone + 'static,
{
    let watch = Arc::new(Mutex::new(Watch::default()));

    let on_finish: Arc<dyn Fn(Option<Error>) + Send + Sync> = {
        let watch = Arc::clone(&watch);
        let subject = subject.clone();
        let attached = Arc::clone(&attached);
        Arc::new(move |error| {
            let (message, channel, socket_listener) = {
                let mut w = watch.lock();
                if w.finished {
                    return;
                }
                w.finished = true;
                (w.message.take(), w.channel.take(), w.socket_listener.take())
            };
            for handle in message.into_iter().chain(channel) {
                handle.cancel();
            }
            if let Some(id) = socket_listener {
                subject.emitter().unsubscribe(Event::Socket, id);
            }
            attached.resolve(subject.completion(), error);
        })
    };

    let message = {
        let on_finish = Arc::clone(&on_finish);
        install(
            vec![EventGroup::new(
                subject.emitter(),
                [Event::End, Event::Finish],
            )],
            move |fired| on_finish(fired.error),
        )
    };
    {
        let mut w = watch.lock();
        if w.finished {
            return;
        }
        w.message = Some(message);
    }

    let arm_channel: Arc<dyn Fn(Arc<dyn Channel>) + Send + Sync> = {
        let watch = Arc::clone(&watch);
        let subject = subject.clone();
        let attached = Arc::clone(&attached);
        let on_finish = Arc::clone(&on_finish);
        Arc::new(move |channel| {
            let mut w = watch.lock();
            if w.finished || w.channel.is_some() {
                return;
            }
            // a late socket event for a listener set that was replaced
            if !subject.completion().is_active(&attached) {
                return;
            }
            let on_finish = Arc::clone(&on_finish);
            w.channel = Some(install(
                vec![EventGroup::new(
                    channel.emitter(),
                    [Event::Error, Event::Close],
                )],
                move |fired| on_finish(fired.error),
            ));
        })
    };

    if let Some(channel) = subject.channel() {
        arm_channel(channel);
        return;
    }

    let emitter = subject.emitter();
    let listener = {
        let watch = Arc::clone(&watch);
        let emitter = Arc::clone(&emitter);
        Arc::new(move |payload: &Payload| {
            let id = watch.lock().socket_listener.take();
            if let Some(id) = id {
                emitter.unsubscribe(Event::Socket, id);
            }
            if let Payload::Channel(channel) = payload {
                arm_channel(Arc::clone(channel));
            }
        })
    };
    let id = emitter.subscribe(Event::Socket, listener);

    let mut w = watch.lock();
    if w.finished {
        drop(w);
        emitter.unsubscribe(Event::Socket, id);
    } else {
        w.socket_listener = Some(id);
    }
}
