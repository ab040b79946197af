//! The outgoing half of an exchange.

use crate::error::{StrataError, StrataResult};
use crate::event::{Emitter, Event, EventEmitter, Payload};
use crate::finished::{Channel, CompletionSlot, MessageState, Subject};
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;

/// An outgoing response.
///
/// Like [`Request`](crate::Request), a `Response` is a shared handle. Headers
/// can be changed until the first write; [`end`](Self::end) completes the
/// response and emits [`Event::Finish`].
#[derive(Clone)]
pub struct Response {
    inner: Arc<ResponseInner>,
}

struct ResponseInner {
    state: Mutex<ResponseState>,
    channel: RwLock<Option<Arc<dyn Channel>>>,
    events: EventEmitter,
    completion: CompletionSlot,
}

struct ResponseState {
    status: u16,
    status_message: Option<String>,
    headers: HeaderMap,
    headers_sent: bool,
    finished: bool,
    body: BytesMut,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self {
            status: 200,
            status_message: None,
            headers: HeaderMap::new(),
            headers_sent: false,
            finished: false,
            body: BytesMut::new(),
        }
    }
}

fn headers_sent_error() -> StrataError {
    StrataError::invalid_argument("cannot modify headers after they are sent")
}

impl Response {
    /// Creates a `200` response with no channel.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates a `200` response travelling over `channel`.
    #[must_use]
    pub fn with_channel(channel: Arc<dyn Channel>) -> Self {
        Self::build(Some(channel))
    }

    fn build(channel: Option<Arc<dyn Channel>>) -> Self {
        Self {
            inner: Arc::new(ResponseInner {
                state: Mutex::new(ResponseState::default()),
                channel: RwLock::new(channel),
                events: EventEmitter::new(),
                completion: CompletionSlot::new(),
            }),
        }
    }

    /// The status code, as set. It is not validated.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.inner.state.lock().status
    }

    /// Sets the status code.
    pub fn set_status(&self, status: u16) {
        self.inner.state.lock().status = status;
    }

    /// The reason phrase: the one set explicitly, else the canonical phrase
    /// for the status.
    #[must_use]
    pub fn status_message(&self) -> Option<String> {
        let state = self.inner.state.lock();
        state.status_message.clone().or_else(|| {
            StatusCode::from_u16(state.status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .map(str::to_string)
        })
    }

    /// Sets an explicit reason phrase.
    pub fn set_status_message(&self, message: impl Into<String>) {
        self.inner.state.lock().status_message = Some(message.into());
    }

    /// Returns a header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<HeaderValue> {
        self.inner.state.lock().headers.get(name).cloned()
    }

    /// Returns a copy of all headers.
    #[must_use]
    pub fn headers(&self) -> HeaderMap {
        self.inner.state.lock().headers.clone()
    }

    /// Sets a header, replacing existing values.
    pub fn set_header(&self, name: &str, value: &str) -> StrataResult<()> {
        let (name, value) = parse_header(name, value)?;
        self.insert_header(name, value)
    }

    /// Sets an already-parsed header, replacing existing values.
    pub fn insert_header(&self, name: HeaderName, value: HeaderValue) -> StrataResult<()> {
        let mut state = self.inner.state.lock();
        if state.headers_sent {
            return Err(headers_sent_error());
        }
        state.headers.insert(name, value);
        Ok(())
    }

    /// Adds a header value without removing existing ones.
    pub fn append_header(&self, name: &str, value: &str) -> StrataResult<()> {
        let (name, value) = parse_header(name, value)?;
        let mut state = self.inner.state.lock();
        if state.headers_sent {
            return Err(headers_sent_error());
        }
        state.headers.append(name, value);
        Ok(())
    }

    /// Copies `headers` onto the response. Every name present in `headers`
    /// replaces all existing values of that name.
    pub fn extend_headers(&self, headers: &HeaderMap) -> StrataResult<()> {
        let mut state = self.inner.state.lock();
        if state.headers_sent {
            return Err(headers_sent_error());
        }
        for name in headers.keys() {
            state.headers.remove(name);
        }
        for (name, value) in headers {
            state.headers.append(name.clone(), value.clone());
        }
        Ok(())
    }

    /// Removes every value of a header.
    pub fn remove_header(&self, name: &str) -> StrataResult<()> {
        let mut state = self.inner.state.lock();
        if state.headers_sent {
            return Err(headers_sent_error());
        }
        state.headers.remove(name);
        Ok(())
    }

    /// Commits the status line and headers.
    pub fn write_head(&self) {
        self.inner.state.lock().headers_sent = true;
    }

    /// Writes a body chunk, committing the headers.
    ///
    /// Returns `false` if the response already ended.
    pub fn write(&self, chunk: impl AsRef<[u8]>) -> bool {
        let mut state = self.inner.state.lock();
        if state.finished {
            return false;
        }
        state.headers_sent = true;
        state.body.extend_from_slice(chunk.as_ref());
        true
    }

    /// Ends the response and emits [`Event::Finish`].
    pub fn end(&self) {
        self.finish(None);
    }

    /// Writes a final chunk, then ends the response.
    pub fn end_with(&self, chunk: impl AsRef<[u8]>) {
        self.finish(Some(chunk.as_ref()));
    }

    fn finish(&self, chunk: Option<&[u8]>) {
        {
            let mut state = self.inner.state.lock();
            if state.finished {
                return;
            }
            if let Some(chunk) = chunk {
                state.body.extend_from_slice(chunk);
            }
            state.headers_sent = true;
            state.finished = true;
        }
        self.inner.events.emit(Event::Finish, &Payload::Empty);
    }

    /// Returns `true` once the headers were committed.
    #[must_use]
    pub fn headers_sent(&self) -> bool {
        self.inner.state.lock().headers_sent
    }

    /// Returns `true` once the response ended.
    #[must_use]
    pub fn finished(&self) -> bool {
        self.inner.state.lock().finished
    }

    /// A copy of the body written so far.
    #[must_use]
    pub fn body(&self) -> Bytes {
        Bytes::copy_from_slice(&self.inner.state.lock().body)
    }

    /// Converts the response written so far into an `http::Response`.
    pub fn to_http(&self) -> StrataResult<http::Response<Bytes>> {
        let state = self.inner.state.lock();
        let status = StatusCode::from_u16(state.status).map_err(|e| {
            StrataError::invalid_argument(format!("status {}: {e}", state.status))
        })?;
        let mut response = http::Response::new(Bytes::copy_from_slice(&state.body));
        *response.status_mut() = status;
        *response.headers_mut() = state.headers.clone();
        Ok(response)
    }

    /// The channel the response is written to, if assigned.
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

    /// The response's event emitter.
    #[must_use]
    pub fn events(&self) -> &EventEmitter {
        &self.inner.events
    }

    /// Returns `true` if both handles refer to the same response.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

fn parse_header(name: &str, value: &str) -> StrataResult<(HeaderName, HeaderValue)> {
    let name = HeaderName::try_from(name)
        .map_err(|e| StrataError::invalid_argument(format!("header name: {e}")))?;
    let value = HeaderValue::try_from(value)
        .map_err(|e| StrataError::invalid_argument(format!("header value: {e}")))?;
    Ok((name, value))
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Subject for Response {
    fn message_state(&self) -> MessageState {
        MessageState::Outgoing {
            finished: self.finished(),
        }
    }

    fn channel(&self) -> Option<Arc<dyn Channel>> {
        Response::channel(self)
    }

    fn emitter(&self) -> Arc<dyn Emitter> {
        Arc::new(self.inner.events.clone())
    }

    fn completion(&self) -> &CompletionSlot {
        &self.inner.completion
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Response")
            .field("status", &state.status)
            .field("headers_sent", &state.headers_sent)
            .field("finished", &state.finished)
            .field("body_len", &state.body.len())
            .finish()
    }
}
