use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::dispatcher::{HandlerDisposer, MessageDispatcher};
use super::manager::{Command, ConnectionManager, Input};
use super::transport::{Transport, WsTransport};
use crate::config::ClientConfig;
use crate::error::{Error, HandlerError, Result};
use crate::types::{ClientEvent, ConnectionState, InboundMessage, OutboundFrame, Topic};

/// Capacity of the lifecycle event channel; slow receivers see `Lagged`
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Real-time subscription client
///
/// Keeps one connection to the server alive across drops, re-sends every
/// desired subscription after each reconnect and routes inbound messages to
/// handlers by their `type`. Application code never deals with the
/// connection lifecycle unless it wants to (see [`events`](Self::events)).
///
/// The client is a cheap handle; clones share the same connection. The
/// connection is shut down by [`disconnect`](Self::disconnect) or when the
/// last handle is dropped.
///
/// # Example
///
/// ```no_run
/// use market_realtime::{ClientConfig, RealtimeClient};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = RealtimeClient::new(ClientConfig::new("wss://markets.example.com/ws"))?;
///
///     let _price = client.on_message("price_update", |msg| {
///         println!("price update: {:?}", msg.get("price"));
///         Ok(())
///     });
///
///     client.connect().await?;
///     client.subscribe("m1").await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct RealtimeClient {
    inbox: mpsc::UnboundedSender<Input>,
    dispatcher: MessageDispatcher,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<ClientEvent>,
}

impl RealtimeClient {
    /// Create a client using the tokio-tungstenite transport
    ///
    /// Must be called from within a tokio runtime. The client starts
    /// `Disconnected`; nothing is opened until [`connect`](Self::connect).
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_transport(config, WsTransport::new())
    }

    /// Create a client on top of a custom [`Transport`]
    pub fn with_transport(config: ClientConfig, transport: impl Transport) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            Error::Config("RealtimeClient must be created inside a tokio runtime".to_string())
        })?;

        // Unbounded: the transport reports from sync callbacks and must not
        // drop frames
        let (inbox, inbox_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let dispatcher = MessageDispatcher::new();

        let manager = ConnectionManager::new(
            config.url,
            config.identity,
            config.reconnect,
            Box::new(transport),
            dispatcher.clone(),
            inbox.downgrade(),
            state_tx,
            events.clone(),
        );
        runtime.spawn(manager.run(inbox_rx));

        Ok(Self {
            inbox,
            dispatcher,
            state,
            events,
        })
    }

    /// Start connecting
    ///
    /// Returns once the attempt has started, not when the connection is
    /// open; watch [`state`](Self::state) or [`events`](Self::events) for
    /// that. A no-op while connected or connecting.
    ///
    /// # Errors
    ///
    /// [`Error::Closed`] after [`disconnect`](Self::disconnect).
    pub async fn connect(&self) -> Result<()> {
        self.request(|reply| Command::Connect {
            identity: None,
            reply,
        })
        .await?
    }

    /// Like [`connect`](Self::connect), replacing the identity forwarded in
    /// subscribe frames
    pub async fn connect_as(&self, identity: impl Into<String>) -> Result<()> {
        let identity = identity.into();
        self.request(|reply| Command::Connect {
            identity: Some(identity),
            reply,
        })
        .await?
    }

    /// Close the connection for good
    ///
    /// Cancels any pending reconnect. Calling it again is a no-op.
    pub async fn disconnect(&self) -> Result<()> {
        match self.request(|reply| Command::Disconnect { reply }).await {
            Ok(()) | Err(Error::Closed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Ask for live updates on `topic`
    ///
    /// The subscription is remembered and re-sent after every reconnect.
    /// When connected, a subscribe frame goes out immediately unless the
    /// topic was already subscribed.
    pub async fn subscribe(&self, topic: impl Into<Topic>) -> Result<()> {
        let topic = topic.into();
        self.request(|reply| Command::Subscribe { topic, reply }).await
    }

    /// Stop live updates on `topic`. Unknown topics are ignored.
    pub async fn unsubscribe(&self, topic: impl Into<Topic>) -> Result<()> {
        let topic = topic.into();
        self.request(|reply| Command::Unsubscribe { topic, reply })
            .await
    }

    /// Topics currently desired, in subscription order
    pub async fn subscriptions(&self) -> Result<Vec<Topic>> {
        self.request(|reply| Command::Subscriptions { reply }).await
    }

    /// Register a handler for inbound messages of `msg_type`
    ///
    /// Handlers persist across reconnects. Call
    /// [`HandlerDisposer::dispose`] to remove it.
    ///
    /// Handlers run on the connection task, one frame at a time. Frames
    /// that arrive meanwhile are queued in memory without a limit and are
    /// never dropped, so a handler that blocks delays every later message
    /// and lets the queue grow. Hand long work off to another task.
    pub fn on_message<F>(&self, msg_type: impl Into<String>, handler: F) -> HandlerDisposer
    where
        F: Fn(&InboundMessage) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.dispatcher.on(msg_type, handler)
    }

    /// Register a handler that receives messages deserialized as `T`
    pub fn on<T, F>(&self, msg_type: impl Into<String>, handler: F) -> HandlerDisposer
    where
        T: DeserializeOwned,
        F: Fn(T) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.dispatcher.on_typed(msg_type, handler)
    }

    /// Send an application payload as a JSON text frame
    ///
    /// Nothing is queued: outside `Connected` this fails immediately.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] when the connection is not open
    /// - [`Error::ReconnectFailed`] when reconnecting gave up and
    ///   [`connect`](Self::connect) has not been called since
    /// - [`Error::Json`] when the payload cannot be serialized
    pub async fn send<T: Serialize + ?Sized>(&self, payload: &T) -> Result<()> {
        let frame = serde_json::to_string(payload)?;
        self.send_text(frame).await
    }

    /// Send a raw text frame
    pub async fn send_text(&self, frame: impl Into<String>) -> Result<()> {
        let frame = frame.into();
        self.request(|reply| Command::Send { frame, reply }).await?
    }

    /// Send a `{"type":"ping"}` liveness frame
    pub async fn ping(&self) -> Result<()> {
        self.send_text(OutboundFrame::Ping.to_text()?).await
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Subscribe to lifecycle events (state changes, lost connections,
    /// giving up). Only events emitted after this call are received.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.inbox
            .send(Input::Command(command(reply)))
            .map_err(|_| Error::Closed)?;
        response.await.map_err(|_| Error::Closed)
    }
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("state", &self.state())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}
