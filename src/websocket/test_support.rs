//! In-memory transport for driving the connection manager in tests.

use parking_lot::Mutex;
use std::sync::Arc;

use super::transport::{EventSink, Transport};
use crate::error::{Error, Result};
use crate::types::{ClientEvent, ConnectionState, Generation};
use crate::RealtimeClient;

#[derive(Default)]
struct FakeState {
    sinks: Vec<EventSink>,
    opens: usize,
    current: Option<Generation>,
    sent: Vec<(Generation, String)>,
    closed: Vec<Generation>,
    refuse: bool,
}

/// Records every open/send/close; the test plays the server through the
/// recorded sinks.
#[derive(Clone, Default)]
pub(crate) struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make every following `open` fail outright
    pub(crate) fn refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse = refuse;
    }

    pub(crate) fn open_count(&self) -> usize {
        self.state.lock().opens
    }

    /// Sink handed to the most recent successful `open`
    pub(crate) fn latest_sink(&self) -> EventSink {
        self.state
            .lock()
            .sinks
            .last()
            .cloned()
            .expect("transport was never opened")
    }

    pub(crate) fn sink(&self, index: usize) -> EventSink {
        self.state.lock().sinks[index].clone()
    }

    /// All frames written so far, oldest first
    pub(crate) fn frames(&self) -> Vec<String> {
        self.state
            .lock()
            .sent
            .iter()
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    pub(crate) fn frames_for(&self, generation: Generation) -> Vec<String> {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|(g, _)| *g == generation)
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    pub(crate) fn clear_frames(&self) {
        self.state.lock().sent.clear();
    }

    pub(crate) fn closed(&self) -> Vec<Generation> {
        self.state.lock().closed.clone()
    }
}

impl Transport for FakeTransport {
    fn open(&mut self, _url: &str, events: EventSink) -> Result<()> {
        let mut state = self.state.lock();
        state.opens += 1;
        if state.refuse {
            return Err(Error::WebSocket("connection refused".to_string()));
        }
        state.current = Some(events.generation());
        state.sinks.push(events);
        Ok(())
    }

    fn send(&mut self, frame: String) -> Result<()> {
        let mut state = self.state.lock();
        let generation = state.current.ok_or(Error::ConnectionClosed)?;
        state.sent.push((generation, frame));
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        if let Some(generation) = state.current.take() {
            state.closed.push(generation);
        }
    }
}

/// Round-trip through the manager so every input queued before this call
/// has been processed.
pub(crate) async fn settle(client: &RealtimeClient) {
    client.subscriptions().await.expect("manager is running");
}

pub(crate) async fn wait_for_state(client: &RealtimeClient, wanted: ConnectionState) {
    let mut state = client.watch_state();
    state
        .wait_for(|s| *s == wanted)
        .await
        .expect("state channel closed");
}

pub(crate) fn subscribe_frame(topic: &str) -> String {
    format!(r#"{{"type":"subscribe","topic":"{}"}}"#, topic)
}

pub(crate) fn drain(events: &mut tokio::sync::broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}
