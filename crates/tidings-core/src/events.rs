//! Event Sink Trait
//!
//! This module provides the EventSink trait the supervisor delivers live
//! events through. Implementations can merge into a reconciler, print to
//! stdout (CLI), or record for tests.

use async_trait::async_trait;
use std::sync::{Arc, RwLock};

use crate::connection::ConnectionState;
use crate::message::Message;
use crate::session::Session;

/// Receiver of everything the supervisor produces
///
/// Events are forwarded verbatim; sinks do their own deduplication.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// A message arrived on the live connection
    async fn emit_message(&self, message: &Message) -> Result<(), String>;

    /// The connection changed state
    async fn emit_state(&self, state: ConnectionState) -> Result<(), String>;

    /// Subsequent events belong to `session`
    ///
    /// Emitted on start and on every session change, before the connection
    /// for the new session is opened.
    async fn emit_session_bound(&self, session: &Session) -> Result<(), String>;
}

/// Replaceable sink, resolved on every dispatch
///
/// Swapping the sink takes effect for the very next event without touching
/// the connection.
#[derive(Clone)]
pub struct SinkSlot {
    current: Arc<RwLock<Arc<dyn EventSink>>>,
}

impl SinkSlot {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            current: Arc::new(RwLock::new(sink)),
        }
    }

    /// The sink to deliver the next event to
    pub fn current(&self) -> Arc<dyn EventSink> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, sink: Arc<dyn EventSink>) {
        match self.current.write() {
            Ok(mut guard) => *guard = sink,
            Err(poisoned) => *poisoned.into_inner() = sink,
        }
    }
}

/// No-op event sink for testing or when only the state is of interest
#[derive(Default, Clone)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit_message(&self, _message: &Message) -> Result<(), String> {
        Ok(())
    }

    async fn emit_state(&self, _state: ConnectionState) -> Result<(), String> {
        Ok(())
    }

    async fn emit_session_bound(&self, _session: &Session) -> Result<(), String> {
        Ok(())
    }
}

/// Stdout event sink for CLI mode - prints live messages to the console
#[derive(Default, Clone)]
pub struct StdoutEventSink {
    /// Whether to print in JSON format
    pub json_output: bool,
}

impl StdoutEventSink {
    pub fn new(json_output: bool) -> Self {
        Self { json_output }
    }
}

#[async_trait]
impl EventSink for StdoutEventSink {
    async fn emit_message(&self, message: &Message) -> Result<(), String> {
        println!("{}", format_message(message, self.json_output));
        Ok(())
    }

    async fn emit_state(&self, state: ConnectionState) -> Result<(), String> {
        tracing::info!("Stream {}", state);
        Ok(())
    }

    async fn emit_session_bound(&self, session: &Session) -> Result<(), String> {
        tracing::info!(
            "Following {} ({})",
            session.server_address,
            if session.is_active() { "signed in" } else { "signed out" }
        );
        Ok(())
    }
}

/// Render one message as a JSON line or a human-readable line
pub fn format_message(message: &Message, json_output: bool) -> String {
    if json_output {
        return serde_json::to_string(message).unwrap_or_default();
    }

    let when = message
        .timestamp()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| message.date.clone());
    let mut line = format!("#{} [{}] p{} {}", message.id, when, message.priority, message.source());
    if let Some(title) = message.title.as_deref().filter(|t| !t.is_empty()) {
        line.push_str(&format!(" {title}:"));
    }
    line.push(' ');
    line.push_str(&message.message);
    if let Some(tags) = message.tags.as_ref().filter(|t| !t.is_empty()) {
        line.push_str(&format!(" [{}]", tags.join(", ")));
    }
    line
}
