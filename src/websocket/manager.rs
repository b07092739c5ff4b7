use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::dispatcher::MessageDispatcher;
use super::registry::SubscriptionRegistry;
use super::transport::{EventSink, Transport, TransportEvent, TransportEventKind};
use crate::config::ReconnectConfig;
use crate::error::{Error, Result};
use crate::types::{ClientEvent, ConnectionState, Generation, InboundMessage, OutboundFrame, Topic};

/// Requests from the client facade
pub(crate) enum Command {
    Connect {
        identity: Option<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Subscribe {
        topic: Topic,
        reply: oneshot::Sender<()>,
    },
    Unsubscribe {
        topic: Topic,
        reply: oneshot::Sender<()>,
    },
    Send {
        frame: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Subscriptions {
        reply: oneshot::Sender<Vec<Topic>>,
    },
}

/// Everything the manager reacts to, in one ordered queue
pub(crate) enum Input {
    Command(Command),
    Transport(TransportEvent),
    ReconnectDue { epoch: u64 },
}

struct PendingReconnect {
    epoch: u64,
    task: JoinHandle<()>,
}

struct GaveUp {
    attempts: u32,
    last_error: String,
}

/// Owns the transport and drives the connection state machine
///
/// Runs as a single task consuming [`Input`]s one at a time, so state
/// transitions, registry updates, replay and dispatch never interleave.
/// Transport and timer tasks hold only weak handles to the inbox; once every
/// client handle is gone the inbox closes and the manager shuts down.
pub(crate) struct ConnectionManager {
    url: String,
    identity: Option<String>,
    reconnect: ReconnectConfig,
    transport: Box<dyn Transport>,
    /// Generation of the transport instance currently owned, if any
    live: Option<Generation>,
    /// Last generation handed out
    generation: Generation,
    registry: SubscriptionRegistry,
    dispatcher: MessageDispatcher,
    attempts: u32,
    state: ConnectionState,
    pending: Option<PendingReconnect>,
    timer_epoch: u64,
    /// Set when the retry ceiling was hit, cleared by the next `connect`
    gave_up: Option<GaveUp>,
    inbox: mpsc::WeakUnboundedSender<Input>,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<ClientEvent>,
}

impl ConnectionManager {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        url: String,
        identity: Option<String>,
        reconnect: ReconnectConfig,
        transport: Box<dyn Transport>,
        dispatcher: MessageDispatcher,
        inbox: mpsc::WeakUnboundedSender<Input>,
        state_tx: watch::Sender<ConnectionState>,
        events_tx: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            url,
            identity,
            reconnect,
            transport,
            live: None,
            generation: Generation(0),
            registry: SubscriptionRegistry::new(),
            dispatcher,
            attempts: 0,
            state: ConnectionState::Disconnected,
            pending: None,
            timer_epoch: 0,
            gave_up: None,
            inbox,
            state_tx,
            events_tx,
        }
    }

    pub(crate) async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Input>) {
        while let Some(input) = inbox.recv().await {
            match input {
                Input::Command(command) => self.handle_command(command),
                Input::Transport(event) => self.handle_transport_event(event),
                Input::ReconnectDue { epoch } => self.handle_reconnect_due(epoch),
            }
            if self.state.is_terminal() {
                break;
            }
        }
        self.shutdown();
        debug!("connection manager stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { identity, reply } => {
                if let Some(identity) = identity {
                    self.identity = Some(identity);
                }
                let _ = reply.send(self.connect());
            }
            Command::Disconnect { reply } => {
                self.shutdown();
                let _ = reply.send(());
            }
            Command::Subscribe { topic, reply } => {
                self.subscribe(topic);
                let _ = reply.send(());
            }
            Command::Unsubscribe { topic, reply } => {
                self.unsubscribe(topic);
                let _ = reply.send(());
            }
            Command::Send { frame, reply } => {
                let _ = reply.send(self.send(frame));
            }
            Command::Subscriptions { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }
        }
    }

    fn connect(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Closed => Err(Error::Closed),
            ConnectionState::Connected | ConnectionState::Connecting => {
                debug!(state = %self.state, "connect ignored");
                Ok(())
            }
            ConnectionState::Reconnecting => {
                // Skip the remaining backoff and try right away
                self.cancel_reconnect();
                self.open_transport();
                Ok(())
            }
            ConnectionState::Disconnected => {
                self.attempts = 0;
                self.gave_up = None;
                self.open_transport();
                Ok(())
            }
        }
    }

    fn subscribe(&mut self, topic: Topic) {
        if !self.registry.add(topic.clone()) {
            debug!(%topic, "already subscribed");
            return;
        }
        if self.state == ConnectionState::Connected {
            self.send_frame(&OutboundFrame::subscribe(topic, self.identity.clone()));
        } else {
            debug!(%topic, state = %self.state, "subscription recorded, sent on connect");
        }
    }

    fn unsubscribe(&mut self, topic: Topic) {
        if !self.registry.remove(&topic) {
            debug!(%topic, "not subscribed");
            return;
        }
        if self.state == ConnectionState::Connected {
            self.send_frame(&OutboundFrame::unsubscribe(topic, self.identity.clone()));
        }
    }

    fn send(&mut self, frame: String) -> Result<()> {
        if self.state != ConnectionState::Connected {
            warn!(state = %self.state, attempt = self.attempts, "send while not connected");
            if let Some(gave_up) = &self.gave_up {
                return Err(Error::ReconnectFailed {
                    attempts: gave_up.attempts,
                    last_error: gave_up.last_error.clone(),
                });
            }
            return Err(Error::NotConnected { state: self.state });
        }
        self.transport.send(frame)
    }

    /// Best-effort write of a control frame. A failed write is followed by
    /// a transport error event, which drives the reconnect.
    fn send_frame(&mut self, frame: &OutboundFrame) {
        let text = match frame.to_text() {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "failed to encode frame");
                return;
            }
        };
        if let Err(e) = self.transport.send(text) {
            warn!(
                generation = %self.generation,
                error = %e,
                frame = ?frame,
                "failed to write frame"
            );
        }
    }

    fn open_transport(&mut self) {
        self.release_transport();
        self.generation = self.generation.next();
        let generation = self.generation;
        self.set_state(ConnectionState::Connecting);

        info!(
            url = %self.url,
            generation = %generation,
            attempt = self.attempts,
            "opening connection"
        );

        let inbox = self.inbox.clone();
        let sink = EventSink::new(generation, move |event| {
            if let Some(inbox) = inbox.upgrade() {
                let _ = inbox.send(Input::Transport(event));
            }
        });

        match self.transport.open(&self.url, sink) {
            Ok(()) => self.live = Some(generation),
            Err(e) => {
                warn!(generation = %generation, error = %e, "transport failed to open");
                self.connection_failed(generation, e.to_string());
            }
        }
    }

    fn release_transport(&mut self) {
        if self.live.take().is_some() {
            self.transport.close();
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        if self.live != Some(event.generation) {
            debug!(
                generation = %event.generation,
                live = ?self.live,
                "dropping event from stale transport"
            );
            return;
        }

        match event.kind {
            TransportEventKind::Opened => self.on_opened(event.generation),
            TransportEventKind::Message(text) => self.on_frame(&text),
            TransportEventKind::Error(reason) => {
                warn!(
                    generation = %event.generation,
                    state = %self.state,
                    attempt = self.attempts,
                    %reason,
                    "transport error"
                );
                self.release_transport();
                self.connection_failed(event.generation, reason);
            }
            TransportEventKind::Closed(reason) => {
                let reason = reason.unwrap_or_else(|| "closed by peer".to_string());
                info!(
                    generation = %event.generation,
                    state = %self.state,
                    attempt = self.attempts,
                    %reason,
                    "transport closed"
                );
                self.release_transport();
                self.connection_failed(event.generation, reason);
            }
        }
    }

    fn on_opened(&mut self, generation: Generation) {
        if self.state != ConnectionState::Connecting {
            debug!(state = %self.state, "ignoring open outside connecting state");
            return;
        }
        self.attempts = 0;
        self.set_state(ConnectionState::Connected);
        self.emit(ClientEvent::Connected { generation });

        let topics = self.registry.snapshot();
        info!(
            generation = %generation,
            topics = topics.len(),
            "connected, replaying subscriptions"
        );
        for topic in topics {
            self.send_frame(&OutboundFrame::subscribe(topic, self.identity.clone()));
        }
    }

    fn on_frame(&mut self, text: &str) {
        if self.state != ConnectionState::Connected {
            debug!(state = %self.state, "dropping frame outside connected state");
            return;
        }
        match InboundMessage::parse(text) {
            Ok(message) => {
                debug!(msg_type = message.msg_type(), "dispatching message");
                let outcome = self.dispatcher.dispatch(&message);
                if outcome.failed > 0 {
                    warn!(
                        msg_type = message.msg_type(),
                        failed = outcome.failed,
                        handled = outcome.handled,
                        state = %self.state,
                        attempt = self.attempts,
                        "message handlers failed"
                    );
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    frame = %text.chars().take(200).collect::<String>(),
                    "dropping malformed frame"
                );
            }
        }
    }

    /// The current connection failed to open or dropped
    fn connection_failed(&mut self, generation: Generation, reason: String) {
        let was_connected = self.state == ConnectionState::Connected;
        self.attempts = self.attempts.saturating_add(1);
        let attempt = self.attempts;

        self.emit(if was_connected {
            ClientEvent::ConnectionLost {
                generation,
                attempt,
                reason: reason.clone(),
            }
        } else {
            ClientEvent::AttemptFailed {
                generation,
                attempt,
                reason: reason.clone(),
            }
        });

        // A dropped live connection always gets at least one retry
        if let (Some(max), false) = (self.reconnect.max_attempts, was_connected) {
            if attempt >= max {
                error!(
                    state = %self.state,
                    attempts = attempt,
                    last_error = %reason,
                    "giving up on reconnecting"
                );
                self.gave_up = Some(GaveUp {
                    attempts: attempt,
                    last_error: reason.clone(),
                });
                self.set_state(ConnectionState::Disconnected);
                self.emit(ClientEvent::MaxAttemptsExhausted {
                    attempts: attempt,
                    last_error: reason,
                });
                return;
            }
        }

        let delay = self.next_delay(attempt);
        info!(
            attempt,
            max_attempts = ?self.reconnect.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        self.set_state(ConnectionState::Reconnecting);
        self.schedule_reconnect(delay);
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        // attempt is at least 1 here; the first retry waits the base delay
        let index = attempt.saturating_sub(1);
        if self.reconnect.jitter {
            self.reconnect
                .backoff
                .jittered(index, &mut rand::thread_rng())
        } else {
            self.reconnect.backoff.delay(index)
        }
    }

    fn schedule_reconnect(&mut self, delay: Duration) {
        self.cancel_reconnect();
        self.timer_epoch += 1;
        let epoch = self.timer_epoch;
        let inbox = self.inbox.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inbox) = inbox.upgrade() {
                let _ = inbox.send(Input::ReconnectDue { epoch });
            }
        });
        self.pending = Some(PendingReconnect { epoch, task });
    }

    fn cancel_reconnect(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.task.abort();
        }
    }

    fn handle_reconnect_due(&mut self, epoch: u64) {
        let current = self.pending.as_ref().map(|p| p.epoch);
        if current != Some(epoch) || self.state != ConnectionState::Reconnecting {
            debug!(
                epoch,
                current = ?current,
                state = %self.state,
                "ignoring superseded reconnect timer"
            );
            return;
        }
        self.pending = None;
        self.open_transport();
    }

    fn shutdown(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.cancel_reconnect();
        self.release_transport();
        self.gave_up = None;
        self.set_state(ConnectionState::Closed);
        info!("client closed");
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        debug!(from = %self.state, to = %state, attempt = self.attempts, "state change");
        self.state = state;
        self.state_tx.send_replace(state);
        self.emit(ClientEvent::StateChanged { state });
    }

    fn emit(&self, event: ClientEvent) {
        // No receivers is fine
        let _ = self.events_tx.send(event);
    }
}
