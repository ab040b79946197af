//! In-memory transport channel.

use crate::error::{Error, StrataError};
use crate::event::{Emitter, Event, EventEmitter, Payload};
use crate::finished::Channel;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// The channel underneath a single exchange.
///
/// The server bridge and the test client both create one per request, so
/// closing it ends exactly one exchange. It tracks the two half-close directions and
/// emits [`Event::Error`] and [`Event::Close`] for completion detection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: u64,
    remote_addr: Option<SocketAddr>,
    readable: AtomicBool,
    writable: AtomicBool,
    destroyed: AtomicBool,
    events: EventEmitter,
}

impl Connection {
    /// Creates an open connection with no known peer address.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates an open connection to `addr`.
    #[must_use]
    pub fn with_remote_addr(addr: SocketAddr) -> Self {
        Self::build(Some(addr))
    }

    fn build(remote_addr: Option<SocketAddr>) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                remote_addr,
                readable: AtomicBool::new(true),
                writable: AtomicBool::new(true),
                destroyed: AtomicBool::new(false),
                events: EventEmitter::new(),
            }),
        }
    }

    /// Process-unique connection id, for log correlation.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The peer address, if known.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr
    }

    /// The connection's event emitter.
    #[must_use]
    pub fn events(&self) -> &EventEmitter {
        &self.inner.events
    }

    /// Marks the peer as done sending.
    pub fn end_readable(&self) {
        self.inner.readable.store(false, Ordering::SeqCst);
    }

    /// Marks the connection as no longer accepting writes.
    pub fn end_writable(&self) {
        self.inner.writable.store(false, Ordering::SeqCst);
    }

    /// Returns `true` once [`Channel::destroy`] has run.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Fails the connection: emits [`Event::Error`] with `err`, then destroys
    /// it. Ignored on a connection that is already destroyed.
    pub fn fail(&self, err: impl Into<StrataError>) {
        if self.is_destroyed() {
            return;
        }
        let err: Error = Arc::new(err.into());
        tracing::debug!(connection_id = self.inner.id, error = %err, "connection failed");
        self.inner.events.emit(Event::Error, &Payload::Error(err));
        self.destroy();
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel for Connection {
    fn is_readable(&self) -> bool {
        self.inner.readable.load(Ordering::SeqCst)
    }

    fn is_writable(&self) -> bool {
        self.inner.writable.load(Ordering::SeqCst)
    }

    fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.readable.store(false, Ordering::SeqCst);
        self.inner.writable.store(false, Ordering::SeqCst);
        self.inner.events.emit(Event::Close, &Payload::Empty);
    }

    fn emitter(&self) -> Arc<dyn Emitter> {
        Arc::new(self.inner.events.clone())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("remote_addr", &self.inner.remote_addr)
            .field("readable", &self.is_readable())
            .field("writable", &self.is_writable())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
