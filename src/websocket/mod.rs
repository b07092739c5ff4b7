//! Reconnecting real-time subscription client.
//!
//! The pieces, leaves first:
//! - [`BackoffPolicy`]: delay schedule between reconnect attempts
//! - [`SubscriptionRegistry`]: topics the application wants, kept across reconnects
//! - [`MessageDispatcher`]: routes inbound messages to handlers by `type`
//! - the connection manager: a single task owning the [`Transport`] and the
//!   connection state machine
//! - [`RealtimeClient`]: the handle application code uses
//!
//! # Connection Management
//!
//! Servers drop idle or overloaded connections. The client reconnects with
//! exponential backoff, re-sends every desired subscription once the new
//! connection opens, and gives up after
//! [`ReconnectConfig::max_attempts`](crate::config::ReconnectConfig::max_attempts)
//! consecutive failures, reporting it through [`RealtimeClient::events`].

mod backoff;
mod client;
mod dispatcher;
mod manager;
mod registry;
mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use backoff::BackoffPolicy;
pub use client::RealtimeClient;
pub use dispatcher::{DispatchOutcome, Handler, HandlerDisposer, MessageDispatcher};
pub use registry::SubscriptionRegistry;
pub use transport::{EventSink, Transport, TransportEvent, TransportEventKind, WsTransport};

// Re-export commonly used types for convenience
pub use crate::types::{ClientEvent, ConnectionState, InboundMessage, OutboundFrame, Topic};
