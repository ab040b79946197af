//! The incoming half of an exchange.

use crate::error::{StrataError, StrataResult};
use crate::event::{Emitter, Event, EventEmitter, Payload};
use crate::finished::{Channel, CompletionSlot, MessageState, Subject};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc::UnboundedSender;

/// An incoming request.
///
/// `Request` is a cheap handle: clones share the same request. Handlers
/// further down a stack observe every change made by handlers above them,
/// including URL rewrites made by mount points and typed extensions.
///
/// # Body
///
/// The transport feeds the body with [`push_chunk`](Self::push_chunk) and
/// [`finish_body`](Self::finish_body). Consumers either pull chunks with
/// [`read_chunk`](Self::read_chunk), [`pipe`](Self::pipe) them into a channel,
/// or [`resume`](Self::resume) the request to discard them. [`Event::End`] is
/// emitted once the complete body has been consumed.
#[derive(Clone)]
pub struct Request {
    inner: Arc<RequestInner>,
}

struct RequestInner {
    method: Method,
    url: RwLock<String>,
    original_url: OnceLock<String>,
    headers: RwLock<HeaderMap>,
    upgrade: AtomicBool,
    body: Mutex<BodyState>,
    channel: RwLock<Option<Arc<dyn Channel>>>,
    extensions: RwLock<http::Extensions>,
    events: EventEmitter,
    completion: CompletionSlot,
}

#[derive(Default)]
struct BodyState {
    buffered: VecDeque<Bytes>,
    received: usize,
    complete: bool,
    ended: bool,
    flowing: bool,
    pipe: Option<UnboundedSender<Bytes>>,
}

impl Request {
    /// Creates a request with no channel.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self::build(method, url.into(), None)
    }

    /// Creates a request travelling over `channel`.
    pub fn with_channel(method: Method, url: impl Into<String>, channel: Arc<dyn Channel>) -> Self {
        Self::build(method, url.into(), Some(channel))
    }

    fn build(method: Method, url: String, channel: Option<Arc<dyn Channel>>) -> Self {
        Self {
            inner: Arc::new(RequestInner {
                method,
                url: RwLock::new(url),
                original_url: OnceLock::new(),
                headers: RwLock::new(HeaderMap::new()),
                upgrade: AtomicBool::new(false),
                body: Mutex::new(BodyState::default()),
                channel: RwLock::new(channel),
                extensions: RwLock::new(http::Extensions::new()),
                events: EventEmitter::new(),
                completion: CompletionSlot::new(),
            }),
        }
    }

    /// The request method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    /// The current request target, as rewritten by any enclosing mount points.
    #[must_use]
    pub fn url(&self) -> String {
        self.inner.url.read().clone()
    }

    /// Replaces the request target.
    pub fn set_url(&self, url: impl Into<String>) {
        *self.inner.url.write() = url.into();
    }

    /// The request target as it was when dispatch began.
    #[must_use]
    pub fn original_url(&self) -> Option<String> {
        self.inner.original_url.get().cloned()
    }

    /// Records the current URL as the original URL unless one was already
    /// recorded, and returns the recorded value.
    pub fn ensure_original_url(&self) -> String {
        self.inner
            .original_url
            .get_or_init(|| self.inner.url.read().clone())
            .clone()
    }

    /// Returns `true` if both handles refer to the same request.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // -- headers --

    /// Returns a header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<HeaderValue> {
        self.inner.headers.read().get(name).cloned()
    }

    /// Returns a copy of all headers.
    #[must_use]
    pub fn headers(&self) -> HeaderMap {
        self.inner.headers.read().clone()
    }

    /// Replaces all headers.
    pub fn set_headers(&self, headers: HeaderMap) {
        *self.inner.headers.write() = headers;
    }

    /// Sets a header, replacing existing values.
    pub fn set_header(&self, name: &str, value: &str) -> StrataResult<()> {
        let name = HeaderName::try_from(name)
            .map_err(|e| StrataError::invalid_argument(format!("header name: {e}")))?;
        let value = HeaderValue::try_from(value)
            .map_err(|e| StrataError::invalid_argument(format!("header value: {e}")))?;
        self.inner.headers.write().insert(name, value);
        Ok(())
    }

    // -- extensions --

    /// Stores a typed value on the request, replacing any previous value of
    /// the same type.
    pub fn set_extension<T: Clone + Send + Sync + 'static>(&self, value: T) {
        self.inner.extensions.write().insert(value);
    }

    /// Returns a copy of a typed value stored on the request.
    #[must_use]
    pub fn extension<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.inner.extensions.read().get::<T>().cloned()
    }

    /// Returns `true` if a value of type `T` is stored.
    #[must_use]
    pub fn has_extension<T: Clone + Send + Sync + 'static>(&self) -> bool {
        self.inner.extensions.read().get::<T>().is_some()
    }

    /// Removes and returns a typed value.
    pub fn remove_extension<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.inner.extensions.write().remove::<T>()
    }

    // -- transport --

    /// Marks the exchange as upgraded to another protocol.
    pub fn set_upgrade(&self, upgrade: bool) {
        self.inner.upgrade.store(upgrade, Ordering::SeqCst);
    }

    /// Returns `true` if the exchange was upgraded.
    #[must_use]
    pub fn is_upgrade(&self) -> bool {
        self.inner.upgrade.load(Ordering::SeqCst)
    }

    /// The channel the request arrived on, if assigned.
    #[must_use]
    pub fn channel(&self) -> Option<Arc<dyn Channel>> {
        self.inner.channel.read().clone()
    }

    /// Assigns the channel and emits [`Event::Socket`].
    pub fn assign_channel(&self, channel: Arc<dyn Channel>) {
        *self.inner.channel.write() = Some(Arc::clone(&channel));
        self.inner
            .events
            .emit(Event::Socket, &Payload::Channel(channel));
    }

    /// The request's event emitter.
    #[must_use]
    pub fn events(&self) -> &EventEmitter {
        &self.inner.events
    }

    // -- body --

    /// Feeds a body chunk from the transport.
    ///
    /// Chunks arriving after [`finish_body`](Self::finish_body) are dropped.
    pub fn push_chunk(&self, chunk: impl Into<Bytes>) {
        let chunk = chunk.into();
        let mut body = self.inner.body.lock();
        if body.complete {
            tracing::warn!(len = chunk.len(), "body chunk after end of body dropped");
            return;
        }
        body.received += chunk.len();

        if let Some(pipe) = &body.pipe {
            if let Err(returned) = pipe.send(chunk) {
                // destination is gone; stop piping and keep the data
                body.pipe = None;
                body.flowing = false;
                body.buffered.push_back(returned.0);
            }
        } else if !body.flowing {
            body.buffered.push_back(chunk);
        }
    }

    /// Signals that the transport has delivered the whole body.
    pub fn finish_body(&self) {
        let mut body = self.inner.body.lock();
        body.complete = true;
        self.settle_body(body);
    }

    /// Takes the next buffered chunk.
    ///
    /// Returns `None` when nothing is buffered. Reading past the end of a
    /// complete body emits [`Event::End`].
    pub fn read_chunk(&self) -> Option<Bytes> {
        let mut body = self.inner.body.lock();
        if let Some(chunk) = body.buffered.pop_front() {
            return Some(chunk);
        }
        if body.complete && !body.ended {
            body.flowing = true;
            self.settle_body(body);
        }
        None
    }

    /// Forwards buffered and future chunks into `destination`.
    ///
    /// The sender is dropped when the body ends, closing the receiving side.
    pub fn pipe(&self, destination: UnboundedSender<Bytes>) {
        let mut body = self.inner.body.lock();
        while let Some(chunk) = body.buffered.pop_front() {
            if let Err(returned) = destination.send(chunk) {
                body.buffered.push_front(returned.0);
                return;
            }
        }
        body.pipe = Some(destination);
        body.flowing = true;
        self.settle_body(body);
    }

    /// Detaches a pipe destination and pauses the body.
    ///
    /// Returns `true` if a destination was attached.
    pub fn unpipe(&self) -> bool {
        let mut body = self.inner.body.lock();
        body.flowing = false;
        body.pipe.take().is_some()
    }

    /// Lets the body flow. Without a pipe destination chunks are discarded.
    pub fn resume(&self) {
        let mut body = self.inner.body.lock();
        body.flowing = true;
        if body.pipe.is_none() {
            body.buffered.clear();
        }
        self.settle_body(body);
    }

    /// Stops the body from flowing; chunks are buffered again.
    pub fn pause(&self) {
        self.inner.body.lock().flowing = false;
    }

    /// Returns `true` once the transport delivered the whole body.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.inner.body.lock().complete
    }

    /// Returns `true` until the body has been consumed to its end.
    #[must_use]
    pub fn is_readable(&self) -> bool {
        !self.inner.body.lock().ended
    }

    /// Returns `true` while the body is flowing.
    #[must_use]
    pub fn is_flowing(&self) -> bool {
        self.inner.body.lock().flowing
    }

    /// Number of body bytes received from the transport.
    #[must_use]
    pub fn bytes_received(&self) -> usize {
        self.inner.body.lock().received
    }

    /// Emits [`Event::End`] once the body is complete, drained and flowing.
    fn settle_body(&self, mut body: MutexGuard<'_, BodyState>) {
        if body.ended || !body.complete || !body.flowing || !body.buffered.is_empty() {
            return;
        }
        body.ended = true;
        let pipe = body.pipe.take();
        drop(body);
        drop(pipe);
        self.inner.events.emit(Event::End, &Payload::Empty);
    }
}

impl Subject for Request {
    fn message_state(&self) -> MessageState {
        let body = self.inner.body.lock();
        MessageState::Incoming {
            complete: body.complete,
            readable: !body.ended,
            upgrade: self.is_upgrade(),
        }
    }

    fn channel(&self) -> Option<Arc<dyn Channel>> {
        Request::channel(self)
    }

    fn emitter(&self) -> Arc<dyn Emitter> {
        Arc::new(self.inner.events.clone())
    }

    fn completion(&self) -> &CompletionSlot {
        &self.inner.completion
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.inner.method)
            .field("url", &*self.inner.url.read())
            .field("original_url", &self.inner.original_url.get())
            .finish_non_exhaustive()
    }
}
