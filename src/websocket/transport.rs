use futures_util::{SinkExt, StreamExt};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::Generation;

/// What a transport reports back about one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    Opened,
    Message(String),
    Error(String),
    Closed(Option<String>),
}

/// A transport event stamped with the generation of the connection that
/// produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub generation: Generation,
    pub kind: TransportEventKind,
}

/// Handle a transport uses to report events for one connection
///
/// Every event sent through a sink carries the sink's generation, so once the
/// connection manager has moved on to a newer connection anything reported
/// here is recognised as stale and dropped.
///
/// Reporting never blocks the socket task. Events queue without bound until
/// the manager gets to them, so inbound frames pile up in memory while a
/// handler is slow.
#[derive(Clone)]
pub struct EventSink {
    generation: Generation,
    deliver: Arc<dyn Fn(TransportEvent) + Send + Sync>,
}

impl EventSink {
    pub fn new<F>(generation: Generation, deliver: F) -> Self
    where
        F: Fn(TransportEvent) + Send + Sync + 'static,
    {
        Self {
            generation,
            deliver: Arc::new(deliver),
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn opened(&self) {
        self.emit(TransportEventKind::Opened);
    }

    pub fn message(&self, text: impl Into<String>) {
        self.emit(TransportEventKind::Message(text.into()));
    }

    pub fn error(&self, reason: impl Into<String>) {
        self.emit(TransportEventKind::Error(reason.into()));
    }

    pub fn closed(&self, reason: Option<String>) {
        self.emit(TransportEventKind::Closed(reason));
    }

    fn emit(&self, kind: TransportEventKind) {
        (self.deliver)(TransportEvent {
            generation: self.generation,
            kind,
        });
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("generation", &self.generation)
            .finish()
    }
}

/// A bidirectional text-frame connection the client can (re)open
///
/// Implementations never block: `open` starts the connection and returns,
/// and progress is reported later through the [`EventSink`]. Each call to
/// `open` supersedes the previous connection.
pub trait Transport: Send + 'static {
    /// Start connecting to `url`. An `Err` means the attempt failed outright
    /// and no events will follow for this sink.
    fn open(&mut self, url: &str, events: EventSink) -> Result<()>;

    /// Queue a text frame on the open connection
    fn send(&mut self, frame: String) -> Result<()>;

    /// Close the current connection, if any
    fn close(&mut self);
}

/// [`Transport`] backed by tokio-tungstenite
///
/// Each connection runs in its own task that owns the socket, forwards
/// inbound text frames to the sink and writes queued outbound frames.
#[derive(Debug, Default)]
pub struct WsTransport {
    connection: Option<WsConnection>,
}

#[derive(Debug)]
struct WsConnection {
    generation: Generation,
    outbound: mpsc::UnboundedSender<Message>,
    task: JoinHandle<()>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for WsTransport {
    fn open(&mut self, url: &str, events: EventSink) -> Result<()> {
        self.close();

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let generation = events.generation();
        let task = tokio::spawn(run_connection(url.to_string(), events, outbound_rx));

        self.connection = Some(WsConnection {
            generation,
            outbound,
            task,
        });
        Ok(())
    }

    fn send(&mut self, frame: String) -> Result<()> {
        let connection = self.connection.as_ref().ok_or(Error::ConnectionClosed)?;
        connection
            .outbound
            .send(Message::Text(frame))
            .map_err(|_| Error::ConnectionClosed)
    }

    fn close(&mut self) {
        // Dropping the outbound sender tells the connection task to send a
        // close frame and exit.
        if let Some(connection) = self.connection.take() {
            debug!(generation = %connection.generation, "closing websocket connection");
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.task.abort();
        }
    }
}

async fn run_connection(
    url: String,
    events: EventSink,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    let ws_stream = match connect_async(url.as_str()).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            events.error(e.to_string());
            return;
        }
    };
    events.opened();

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(message) => {
                    if let Err(e) = write.send(message).await {
                        events.error(e.to_string());
                        return;
                    }
                }
                None => {
                    // Owner closed the transport
                    let _ = write.send(Message::Close(None)).await;
                    return;
                }
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    // Skip empty or whitespace-only messages
                    if text.trim().is_empty() {
                        continue;
                    }
                    events.message(text);
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => events.message(text),
                    Err(_) => warn!(generation = %events.generation(), "dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(close_frame))) => {
                    let reason = close_frame
                        .map(|frame| format!("code={}, reason={}", frame.code, frame.reason));
                    events.closed(reason);
                    return;
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Handled automatically by tungstenite
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    events.error(e.to_string());
                    return;
                }
                None => {
                    events.closed(None);
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_sink_stamps_generation() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            EventSink::new(Generation(3), move |event| seen.lock().unwrap().push(event))
        };

        sink.opened();
        sink.message("{\"type\":\"x\"}");
        sink.closed(None);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|e| e.generation == Generation(3)));
        assert_eq!(seen[0].kind, TransportEventKind::Opened);
        assert_eq!(seen[2].kind, TransportEventKind::Closed(None));
    }

    #[test]
    fn test_send_without_connection_fails() {
        let mut transport = WsTransport::new();
        assert!(matches!(
            transport.send("{}".to_string()),
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_reports_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(Generation(1), move |event| {
            let _ = tx.send(event);
        });

        let mut transport = WsTransport::new();
        // Port 9 (discard) on localhost is not expected to speak websocket
        transport.open("ws://127.0.0.1:9/ws", sink).unwrap();

        let event = rx.recv().await.expect("transport reports an outcome");
        assert_eq!(event.generation, Generation(1));
        assert!(matches!(event.kind, TransportEventKind::Error(_)));
    }
}
