//! # market-realtime
//!
//! A reconnecting real-time subscription client for prediction-market
//! backends.
//!
//! This library keeps a single WebSocket connection to the server and takes
//! care of everything around it:
//! - Reconnecting with exponential backoff when the connection drops
//! - Remembering which topics (markets) the application wants and
//!   re-subscribing after every reconnect
//! - Routing inbound messages to handlers registered per message `type`
//! - Reporting lifecycle changes, including giving up after too many
//!   failed attempts
//!
//! ## Features
//!
//! - **Explicit ownership**: no global state; a [`RealtimeClient`] handle is
//!   created by and passed around the owning application session
//! - **Pluggable transport**: the [`Transport`](websocket::Transport) trait
//!   can be swapped for tests or other runtimes
//! - **Typed handlers**: register handlers that receive frames deserialized
//!   into your own types
//! - **Proper Error Handling**: No panics, handler failures are isolated
//!
//! ## Example
//!
//! ```no_run
//! use market_realtime::{ClientConfig, ClientEvent, RealtimeClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::from_origin("https://markets.example.com", "/ws")?
//!         .with_identity("user-42");
//!     let client = RealtimeClient::new(config)?;
//!
//!     let _updates = client.on_message("price_update", |msg| {
//!         println!("{:?}", msg.payload());
//!         Ok(())
//!     });
//!
//!     let mut events = client.events();
//!     client.connect().await?;
//!     client.subscribe("market-1").await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let ClientEvent::MaxAttemptsExhausted { attempts, .. } = event {
//!             eprintln!("gave up after {} attempts", attempts);
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

// Public modules
pub mod config;
pub mod error;
pub mod types;
pub mod websocket;

// Re-export commonly used types
pub use config::{endpoint_from_origin, ClientConfig, ReconnectConfig};
pub use error::{Error, HandlerError, Result};
pub use types::{ClientEvent, ConnectionState, Generation, InboundMessage, OutboundFrame, Topic};

// Re-export the client
pub use websocket::{BackoffPolicy, HandlerDisposer, RealtimeClient};
