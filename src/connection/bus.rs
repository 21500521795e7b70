//! Internal message bus for handling Feathers calls and events.
//!
//! This module provides the core infrastructure for:
//! - Classifying inbound frames and answering keepalive pings,
//! - Tracking outstanding calls (`issue_call` → call result),
//! - Dispatching server events to registered handlers (`on` → event).
//!
//! All outbound text goes through one unbounded queue drained by the writer
//! task, so pongs and calls issued from other tasks never interleave on the
//! socket.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures_channel::{mpsc, oneshot};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{FeathersError, Result};
use crate::protocol::{CallMessage, Frame, Message, PayloadCodec};

/// Fired once after the websocket handshake completes. Payload is `null`.
pub const CONNECT_EVENT: &str = "connect";
/// Fired with the raw JSON of every payload frame, before decoding.
pub const MESSAGE_EVENT: &str = "message";
/// Fired once when the transport closes, by any cause. Payload is `null`.
pub const DISCONNECT_EVENT: &str = "disconnect";

/// An event handler.
///
/// Handlers run inline on the receive loop, so a slow handler delays
/// keepalive replies. Hand long work off to a task.
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Token returned by handler registration, used to remove the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// A frame queued for the writer task.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outbound {
    Text(String),
    Close,
}

type CallSender = oneshot::Sender<Result<Value>>;

struct PendingCalls {
    calls: HashMap<u64, CallSender>,
    next_id: u64,
    closed: bool,
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self {
            calls: HashMap::new(),
            next_id: 1,
            closed: false,
        }
    }
}

type SharedPending = Arc<Mutex<PendingCalls>>;

// Never held across an await, and every update leaves the table consistent,
// so a poisoned lock is still usable.
fn lock(pending: &SharedPending) -> MutexGuard<'_, PendingCalls> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A call that has been sent and awaits its result.
///
/// Resolves exactly once: with the server's result, with
/// [`FeathersError::Server`] if the server reported an error, or with
/// [`FeathersError::ConnectionClosed`] if the connection went away first.
///
/// Dropping it (e.g. when a `tokio::time::timeout` around it expires) removes
/// the call from the pending table; a late result is then discarded.
#[must_use = "a pending call does nothing unless awaited"]
pub struct PendingCall {
    id: u64,
    rx: oneshot::Receiver<Result<Value>>,
    pending: SharedPending,
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall").field("id", &self.id).finish()
    }
}

impl PendingCall {
    /// Identifier assigned to this call.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for PendingCall {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(FeathersError::ConnectionClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if lock(&self.pending).calls.remove(&self.id).is_some() {
            debug!("Call {} abandoned by its caller", self.id);
        }
    }
}

/// Internal message bus for the connection.
///
/// Shared between the reader task, the public [`Connection`] API and
/// [`Service`] handles.
///
/// [`Connection`]: super::Connection
/// [`Service`]: super::Service
#[derive(Clone)]
pub(crate) struct MessageBus {
    /// Event handlers by event name, in registration order.
    handlers: Arc<RwLock<HashMap<String, Vec<(HandlerId, EventHandler)>>>>,
    /// Event name → additional name its handlers also receive.
    aliases: Arc<RwLock<HashMap<String, String>>>,
    /// Calls awaiting a result.
    pending: SharedPending,
    next_handler_id: Arc<AtomicU64>,
    disconnected: Arc<AtomicBool>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl MessageBus {
    /// Creates a new message bus.
    ///
    /// Returns the bus and the receiving end of its outbound queue.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, outbound_rx) = mpsc::unbounded();
        let bus = Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            aliases: Arc::new(RwLock::new(HashMap::new())),
            pending: Arc::new(Mutex::new(PendingCalls::default())),
            next_handler_id: Arc::new(AtomicU64::new(1)),
            disconnected: Arc::new(AtomicBool::new(false)),
            outbound,
        };
        (bus, outbound_rx)
    }

    /// Registers a handler for an event, after any existing handlers.
    pub async fn register_handler(&self, event: &str, handler: EventHandler) -> HandlerId {
        let id = HandlerId(self.next_handler_id.fetch_add(1, Ordering::Relaxed));
        debug!("Registering handler for {event}");
        self.handlers
            .write()
            .await
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    /// Removes one handler. Returns `false` if it was not registered.
    pub async fn remove_handler(&self, event: &str, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write().await;
        let Some(list) = handlers.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(handler_id, _)| *handler_id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(event);
        }
        removed
    }

    /// Routes events named `from` to the handlers of `to` as well.
    pub async fn register_alias(&self, from: &str, to: &str) {
        self.aliases
            .write()
            .await
            .insert(from.to_string(), to.to_string());
    }

    async fn has_handlers(&self, event: &str) -> bool {
        self.handlers.read().await.contains_key(event)
    }

    /// Dispatches an event to its handlers (and its alias's handlers).
    ///
    /// An event nobody listens to is logged and dropped.
    pub async fn dispatch(&self, event: &str, payload: Value) {
        let alias = self.aliases.read().await.get(event).cloned();

        // Handlers are cloned out so they may register or remove handlers.
        let targets: Vec<EventHandler> = {
            let handlers = self.handlers.read().await;
            std::iter::once(event)
                .chain(alias.as_deref())
                .filter_map(|name| handlers.get(name))
                .flatten()
                .map(|(_, handler)| Arc::clone(handler))
                .collect()
        };

        if targets.is_empty() {
            info!("No handler registered for {event} payload={payload}");
            return;
        }

        debug!("Handling event: {event}");
        for handler in targets {
            handler(payload.clone());
        }
    }

    /// Sends a call and records it as pending.
    ///
    /// Returns immediately; await the returned [`PendingCall`] for the result.
    /// Ids are assigned and queued under one lock, so they reach the wire in
    /// increasing order even with concurrent callers.
    pub fn issue_call(&self, method: &str, args: Vec<Value>) -> Result<PendingCall> {
        let mut pending = lock(&self.pending);
        if pending.closed {
            return Err(FeathersError::ConnectionClosed);
        }

        let id = pending.next_id;
        let text = PayloadCodec::encode(&CallMessage::new(id, method, args))?;
        debug!("> {text}");
        if self.outbound.unbounded_send(Outbound::Text(text)).is_err() {
            return Err(FeathersError::ConnectionClosed);
        }

        let (tx, rx) = oneshot::channel();
        pending.calls.insert(id, tx);
        pending.next_id += 1;

        Ok(PendingCall {
            id,
            rx,
            pending: Arc::clone(&self.pending),
        })
    }

    /// Completes a pending call with its result.
    ///
    /// Results for unknown or already completed ids are logged and dropped.
    pub fn resolve(&self, id: u64, outcome: Result<Value>) {
        let Some(tx) = lock(&self.pending).calls.remove(&id) else {
            info!("Discarding result for unknown call {id}");
            return;
        };
        if tx.send(outcome).is_err() {
            debug!("Caller of call {id} is no longer waiting");
        }
    }

    /// Fails every pending call with [`FeathersError::ConnectionClosed`] and
    /// refuses new ones. Returns the number of calls failed.
    pub fn fail_all(&self) -> usize {
        let calls = {
            let mut pending = lock(&self.pending);
            pending.closed = true;
            std::mem::take(&mut pending.calls)
        };
        let count = calls.len();
        for (id, tx) in calls {
            debug!("Failing call {id}: connection closed");
            let _ = tx.send(Err(FeathersError::ConnectionClosed));
        }
        count
    }

    /// Number of calls awaiting a result.
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).calls.len()
    }

    /// Processes one inbound text frame.
    ///
    /// Pings are answered before returning. Malformed frames are logged and
    /// dropped; nothing here fails the connection.
    pub async fn process_frame(&self, text: &str) {
        debug!("< {text}");
        let frame = match Frame::classify(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping frame: {e}");
                return;
            }
        };

        match frame {
            Frame::Ping(nonce) => {
                debug!("Sending pong {nonce}");
                if self.send_text(Frame::pong(&nonce)).is_err() {
                    debug!("Pong {nonce} not sent: connection closing");
                }
            }
            Frame::Pong(nonce) => debug!("Received pong {nonce}"),
            Frame::Payload(value) => self.process_payload(value).await,
        }
    }

    async fn process_payload(&self, value: Value) {
        if self.has_handlers(MESSAGE_EVENT).await {
            self.dispatch(MESSAGE_EVENT, value.clone()).await;
        }

        match PayloadCodec::decode(value) {
            Ok(Message::Event { name, payload }) => self.dispatch(&name, payload).await,
            Ok(Message::CallResult { id, outcome }) => {
                self.resolve(id, outcome.map_err(FeathersError::from));
            }
            Err(e) => warn!("Dropping payload: {e}"),
        }
    }

    /// Queues a text frame for the writer.
    pub fn send_text(&self, text: String) -> Result<()> {
        self.outbound
            .unbounded_send(Outbound::Text(text))
            .map_err(|_| FeathersError::ConnectionClosed)
    }

    /// Queues a close frame for the writer.
    pub fn request_close(&self) {
        let _ = self.outbound.unbounded_send(Outbound::Close);
    }

    /// Tears the bus down after the transport ended.
    ///
    /// Fails all pending calls, queues a close frame, closes the outbound
    /// queue and fires `disconnect`. Only the first invocation has any effect.
    pub async fn shutdown(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        let failed = self.fail_all();
        if failed > 0 {
            info!("Connection closed with {failed} pending call(s)");
        }
        // Lets the writer flush any close reply still queued in the socket.
        self.request_close();
        self.outbound.close_channel();
        self.dispatch(DISCONNECT_EVENT, Value::Null).await;
    }
}
