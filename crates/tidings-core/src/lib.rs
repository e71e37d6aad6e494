//! Tidings Core Library
//!
//! Client-side machinery for following a push-notification server: a
//! supervised real-time stream that reconnects with exponential backoff, and
//! a reconciler that merges REST history pages with live events into one
//! deduplicated, newest-first message list.
//!
//! # Modules
//!
//! - [`session`] - Credentials, endpoint derivation and the reactive provider
//! - [`connection`] - Connection state machine and backoff policy
//! - [`transport`] - Transport trait and the WebSocket implementation
//! - [`supervisor`] - Task that owns the single live connection
//! - [`rest`] - History API trait and the HTTP client
//! - [`reconciler`] - Canonical message sequence
//! - [`feed`] - Supervisor and reconciler wired together
//! - [`events`] - Event sink trait for decoupling from the host
//! - [`message`] - Wire message types
//! - [`config`] - Configuration file and defaults
//! - [`error`] - Error types

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod feed;
pub mod message;
pub mod reconciler;
pub mod rest;
pub mod session;
pub mod supervisor;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::{FeedConfig, HistoryConfig, StreamConfig};
pub use connection::{BackoffPolicy, ConnectionState};
pub use error::{AppError, Result};
pub use events::{EventSink, NoOpEventSink, StdoutEventSink};
pub use feed::NotificationFeed;
pub use message::{Message, PagedMessages, Paging, Source};
pub use reconciler::{PageLoad, PageOutcome, Reconciler};
pub use rest::{HistoryApi, RestClient};
pub use session::{Session, SessionProvider, StreamTarget};
pub use supervisor::Supervisor;
pub use transport::{Transport, TransportError, TransportEvent, TransportHandle};

#[cfg(feature = "websocket")]
pub use transport::WsTransport;
