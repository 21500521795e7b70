//! Feathers client connection management.
//!
//! This module handles the websocket connection lifecycle:
//! - Opening the Primus websocket and firing `connect`,
//! - Running the receive loop (keepalive, events, call results),
//! - Serializing outbound frames through a single writer task,
//! - Graceful shutdown, which fails every pending call and fires `disconnect`.

mod bus;
mod service;

use std::sync::Arc;

use futures_channel::mpsc;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message, client::IntoClientRequest},
};
use tracing::{debug, info, warn};

pub use bus::{
    CONNECT_EVENT, DISCONNECT_EVENT, EventHandler, HandlerId, MESSAGE_EVENT, PendingCall,
};
pub use service::{Service, service_event_name};

use crate::config::ClientConfig;
use crate::endpoint::primus_url;
use crate::error::{FeathersError, Result};
use bus::{MessageBus, Outbound};

/// Lifecycle of a [`Connection`].
///
/// A `Connection` only exists once the handshake has succeeded, so it starts
/// out `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Closed,
}

/// Configures and opens a [`Connection`].
///
/// Handlers registered here are in place before `connect` fires.
///
/// # Example
///
/// ```no_run
/// use feathers_primus::Connection;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let conn = Connection::builder("https://api.ezdevice.net")
///     .connect_timeout(Duration::from_secs(5))
///     .on("connect", |_| println!("connected"))
///     .alias("ezdevs event:joyframe", "devevent")
///     .connect()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionBuilder {
    url: String,
    config: ClientConfig,
    handlers: Vec<(String, EventHandler)>,
    aliases: Vec<(String, String)>,
}

impl ConnectionBuilder {
    /// Creates a builder for the server at `url`.
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            config: ClientConfig::default(),
            handlers: Vec::new(),
            aliases: Vec::new(),
        }
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the Primus pathname (default `/primus`).
    #[must_use]
    pub fn pathname(mut self, pathname: &str) -> Self {
        self.config.pathname = pathname.to_string();
        self
    }

    /// Sets the websocket handshake timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Enables or disables the `_primuscb` cache buster.
    #[must_use]
    pub fn cache_buster(mut self, enabled: bool) -> Self {
        self.config.cache_buster = enabled;
        self
    }

    /// Registers an event handler.
    #[must_use]
    pub fn on<F>(mut self, event: &str, handler: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.handlers.push((event.to_string(), Arc::new(handler)));
        self
    }

    /// Routes events named `from` to the handlers of `to` as well.
    #[must_use]
    pub fn alias(mut self, from: &str, to: &str) -> Self {
        self.aliases.push((from.to_string(), to.to_string()));
        self
    }

    /// Opens the websocket and starts the connection.
    pub async fn connect(self) -> Result<Connection> {
        let url = primus_url(&url::Url::parse(&self.url)?, &self.config)?;
        let request = url.as_str().into_client_request()?;

        let (ws_stream, _) = tokio::time::timeout(self.config.connect_timeout, connect_async(request))
            .await
            .map_err(|_| FeathersError::ConnectionFailed("handshake timeout".to_string()))?
            .map_err(|e| FeathersError::ConnectionFailed(e.to_string()))?;

        info!("Connected to {}", url);
        Ok(self.attach(ws_stream).await)
    }

    /// Starts a connection over an already established websocket.
    pub async fn attach<S>(self, stream: S) -> Connection
    where
        S: Stream<Item = std::result::Result<Message, tungstenite::Error>>
            + Sink<Message, Error = tungstenite::Error>
            + Send
            + Unpin
            + 'static,
    {
        let (bus, outbound_rx) = MessageBus::new();
        for (event, handler) in self.handlers {
            bus.register_handler(&event, handler).await;
        }
        for (from, to) in self.aliases {
            bus.register_alias(&from, &to).await;
        }
        Connection::start(stream, bus, outbound_rx, self.config).await
    }
}

/// A Feathers client connection.
///
/// Owns the reader and writer tasks, the pending-call table and the handler
/// table. Dropping it stops the receive loop; [`close`](Self::close) does the
/// same and waits until pending calls are failed and `disconnect` has fired.
pub struct Connection {
    bus: MessageBus,
    config: ClientConfig,
    state: Arc<RwLock<ConnectionState>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl Connection {
    /// Connects to the Feathers server at `url` with default settings.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use feathers_primus::Connection;
    /// use serde_json::json;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let mut conn = Connection::connect("https://api.ezdevice.net").await?;
    /// conn.on("devices patched", |device| println!("patched: {device}")).await;
    /// let device = conn.service("devices").get("f0001", json!({})).await?;
    /// conn.close().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(url: &str) -> Result<Self> {
        Self::builder(url).connect().await
    }

    /// Creates a [`ConnectionBuilder`].
    pub fn builder(url: &str) -> ConnectionBuilder {
        ConnectionBuilder::new(url)
    }

    async fn start<S>(
        stream: S,
        bus: MessageBus,
        outbound_rx: mpsc::UnboundedReceiver<Outbound>,
        config: ClientConfig,
    ) -> Self
    where
        S: Stream<Item = std::result::Result<Message, tungstenite::Error>>
            + Sink<Message, Error = tungstenite::Error>
            + Send
            + Unpin
            + 'static,
    {
        let state = Arc::new(RwLock::new(ConnectionState::Connected));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (sink, stream) = stream.split();

        let writer = tokio::spawn(write_loop(sink, outbound_rx));

        bus.dispatch(CONNECT_EVENT, Value::Null).await;

        let reader = tokio::spawn(read_loop(
            stream,
            bus.clone(),
            shutdown_rx,
            Arc::clone(&state),
        ));

        Self {
            bus,
            config,
            state,
            shutdown_tx: Some(shutdown_tx),
            reader: Some(reader),
            writer: Some(writer),
        }
    }

    /// Registers a handler for an event and returns its removal token.
    ///
    /// Handlers run on the receive loop and must return quickly; a blocked
    /// handler delays keepalive replies.
    pub async fn on<F>(&self, event: &str, handler: F) -> HandlerId
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.bus.register_handler(event, Arc::new(handler)).await
    }

    /// Removes a handler. Returns `false` if it was not registered.
    pub async fn off(&self, event: &str, id: HandlerId) -> bool {
        self.bus.remove_handler(event, id).await
    }

    /// Routes events named `from` to the handlers of `to` as well.
    pub async fn alias(&self, from: &str, to: &str) {
        self.bus.register_alias(from, to).await;
    }

    /// Sends a call without waiting for its result.
    ///
    /// The returned [`PendingCall`] carries the call id and resolves when the
    /// result arrives. No timeout is applied; wrap it in
    /// `tokio::time::timeout` if needed.
    pub fn issue_call(&self, method: &str, args: Vec<Value>) -> Result<PendingCall> {
        self.bus.issue_call(method, args)
    }

    /// Sends a call and waits for its result.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.issue_call(method, args)?.await
    }

    /// Returns a handle to a named service.
    pub fn service(&self, name: &str) -> Service {
        Service::new(self.bus.clone(), name)
    }

    /// Number of calls still awaiting a result.
    pub fn pending_calls(&self) -> usize {
        self.bus.pending_count()
    }

    /// Returns the current connection state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Closes the connection.
    ///
    /// Sends a websocket close frame, stops the receive loop, fails all
    /// pending calls with [`FeathersError::ConnectionClosed`] and fires
    /// `disconnect`. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            self.bus.request_close();
            let _ = tx.send(());
        }

        if let Some(reader) = self.reader.take() {
            if let Err(e) = reader.await {
                warn!("Reader task failed: {e}");
            }
        }
        // The reader has torn the bus down by now, whatever stopped it.
        self.bus.shutdown().await;

        if let Some(writer) = self.writer.take() {
            match tokio::time::timeout(self.config.close_timeout, writer).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Writer task failed: {e}"),
                Err(_) => warn!("Timed out flushing close frame"),
            }
        }
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            self.bus.request_close();
            let _ = tx.send(());
        }
    }
}

/// Receives frames in arrival order until the transport ends or shutdown is
/// requested, then tears the bus down.
async fn read_loop<R>(
    mut stream: R,
    bus: MessageBus,
    mut shutdown_rx: broadcast::Receiver<()>,
    state: Arc<RwLock<ConnectionState>>,
) where
    R: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => bus.process_frame(text.as_str()).await,
                    Some(Ok(Message::Binary(data))) => {
                        warn!("Dropping {} byte binary frame", data.len());
                    }
                    Some(Ok(Message::Close(close_frame))) => {
                        let reason = close_frame.map(|f| f.reason.as_str().to_owned()).unwrap_or_default();
                        info!("Server closed connection: {reason}");
                        break;
                    }
                    // Websocket-level ping/pong is answered by tungstenite.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("Transport error: {e}");
                        break;
                    }
                    None => {
                        info!("Transport ended");
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("Shutdown requested");
                break;
            }
        }
    }

    *state.write().await = ConnectionState::Closed;
    bus.shutdown().await;
}

/// Drains the outbound queue into the websocket until it closes.
async fn write_loop<W>(mut sink: W, mut outbound_rx: mpsc::UnboundedReceiver<Outbound>)
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    while let Some(outbound) = outbound_rx.next().await {
        match outbound {
            Outbound::Text(text) => {
                if let Err(e) = sink.send(Message::text(text)).await {
                    warn!("Failed to send frame: {e}");
                    break;
                }
            }
            Outbound::Close => {
                if let Err(e) = sink.close().await {
                    debug!("Failed to close websocket: {e}");
                }
                break;
            }
        }
    }
}
