//! In-memory doubles for the transport, the history API and the event sink

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::connection::ConnectionState;
use crate::error::{AppError, Result};
use crate::events::EventSink;
use crate::message::{Message, PagedMessages, Paging};
use crate::rest::HistoryApi;
use crate::session::{Session, StreamTarget};
use crate::transport::{Transport, TransportError, TransportEvent, TransportHandle};

pub(crate) fn message(id: i64) -> Message {
    Message::from_frame(&format!(
        r#"{{"id":{id},"appid":1,"message":"m{id}","priority":5,"date":"2024-03-01 10:00:00"}}"#
    ))
    .unwrap()
}

pub(crate) fn page(ids: &[i64]) -> PagedMessages {
    PagedMessages {
        messages: ids.iter().map(|id| message(*id)).collect(),
        paging: Paging {
            size: ids.len() as i64,
            since: 0,
            limit: 100,
        },
    }
}

/// One call to [`MockTransport::open`]
#[derive(Debug, Clone)]
pub(crate) struct OpenAttempt {
    pub session: Session,
    pub target: StreamTarget,
    pub at: Instant,
}

#[derive(Default)]
struct TransportState {
    failures_remaining: usize,
    attempts: Vec<OpenAttempt>,
    /// Senders for successful opens, in order
    connections: Vec<Option<mpsc::Sender<TransportEvent>>>,
}

/// Transport whose connections are driven by the test
pub(crate) struct MockTransport {
    state: Mutex<TransportState>,
    attempt_count: watch::Sender<usize>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            state: Mutex::new(TransportState::default()),
            attempt_count: watch::channel(0).0,
        }
    }
}

impl MockTransport {
    /// Make the next `n` opens fail
    pub fn fail_next(&self, n: usize) {
        self.state.lock().unwrap().failures_remaining = n;
    }

    pub fn attempts(&self) -> Vec<OpenAttempt> {
        self.state.lock().unwrap().attempts.clone()
    }

    pub async fn wait_for_attempts(&self, n: usize) {
        let mut rx = self.attempt_count.subscribe();
        rx.wait_for(|count| *count >= n).await.unwrap();
    }

    /// Push an event into the `index`-th successful connection
    pub async fn send(&self, index: usize, event: TransportEvent) {
        let tx = self.sender(index).expect("connection is gone");
        tx.send(event).await.expect("handle was closed");
    }

    /// Like [`MockTransport::send`] but tolerates a released connection
    pub fn try_send(&self, index: usize, event: TransportEvent) -> bool {
        self.sender(index)
            .is_some_and(|tx| tx.try_send(event).is_ok())
    }

    /// Drop the server side of a connection, which ends its event stream
    pub fn disconnect(&self, index: usize) {
        self.state.lock().unwrap().connections[index] = None;
    }

    /// Whether the client released the `index`-th connection
    pub fn is_released(&self, index: usize) -> bool {
        self.sender(index).map_or(true, |tx| tx.is_closed())
    }

    fn sender(&self, index: usize) -> Option<mpsc::Sender<TransportEvent>> {
        self.state.lock().unwrap().connections[index].clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(
        &self,
        session: &Session,
        target: &StreamTarget,
    ) -> std::result::Result<TransportHandle, TransportError> {
        let result = {
            let mut state = self.state.lock().unwrap();
            state.attempts.push(OpenAttempt {
                session: session.clone(),
                target: target.clone(),
                at: Instant::now(),
            });
            if state.failures_remaining > 0 {
                state.failures_remaining -= 1;
                Err(TransportError::ConnectFailed("connection refused".to_string()))
            } else {
                let (tx, rx) = mpsc::channel(16);
                state.connections.push(Some(tx));
                Ok(TransportHandle::new(rx, None))
            }
        };
        self.attempt_count.send_modify(|count| *count += 1);
        result
    }
}

enum Reply {
    Ready(Result<PagedMessages>),
    Gated(oneshot::Receiver<Result<PagedMessages>>),
}

#[derive(Default)]
struct HistoryState {
    replies: VecDeque<Reply>,
    list_calls: Vec<(u32, Option<i64>)>,
    deleted: Vec<i64>,
    delete_all_calls: usize,
    delete_error: Option<AppError>,
}

/// History API answering from a queue of scripted replies
///
/// An empty queue answers with an empty page.
pub(crate) struct MockHistory {
    state: Mutex<HistoryState>,
    list_count: watch::Sender<usize>,
}

impl Default for MockHistory {
    fn default() -> Self {
        Self {
            state: Mutex::new(HistoryState::default()),
            list_count: watch::channel(0).0,
        }
    }
}

impl MockHistory {
    pub fn push_page(&self, page: PagedMessages) {
        self.push(Reply::Ready(Ok(page)));
    }

    pub fn push_error(&self, err: AppError) {
        self.push(Reply::Ready(Err(err)));
    }

    /// Queue a reply the test releases later
    pub fn push_gated(&self) -> oneshot::Sender<Result<PagedMessages>> {
        let (tx, rx) = oneshot::channel();
        self.push(Reply::Gated(rx));
        tx
    }

    pub fn fail_deletes(&self, err: AppError) {
        self.state.lock().unwrap().delete_error = Some(err);
    }

    pub fn allow_deletes(&self) {
        self.state.lock().unwrap().delete_error = None;
    }

    pub fn list_calls(&self) -> Vec<(u32, Option<i64>)> {
        self.state.lock().unwrap().list_calls.clone()
    }

    pub fn deleted(&self) -> Vec<i64> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn delete_all_calls(&self) -> usize {
        self.state.lock().unwrap().delete_all_calls
    }

    pub async fn wait_for_list_calls(&self, n: usize) {
        let mut rx = self.list_count.subscribe();
        rx.wait_for(|count| *count >= n).await.unwrap();
    }

    fn push(&self, reply: Reply) {
        self.state.lock().unwrap().replies.push_back(reply);
    }
}

#[async_trait]
impl HistoryApi for MockHistory {
    async fn list_messages(&self, limit: u32, since: Option<i64>) -> Result<PagedMessages> {
        let reply = {
            let mut state = self.state.lock().unwrap();
            state.list_calls.push((limit, since));
            state.replies.pop_front()
        };
        self.list_count.send_modify(|count| *count += 1);

        match reply {
            Some(Reply::Ready(result)) => result,
            Some(Reply::Gated(rx)) => rx
                .await
                .unwrap_or_else(|_| Err(AppError::RequestFailed("gate dropped".to_string()))),
            None => Ok(page(&[])),
        }
    }

    async fn delete_message(&self, id: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.delete_error.clone() {
            return Err(err);
        }
        state.deleted.push(id);
        Ok(())
    }

    async fn delete_all_messages(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.delete_all_calls += 1;
        match state.delete_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// What a [`ChannelSink`] observed
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SinkEvent {
    Message(i64),
    State(ConnectionState),
    Bound(Session),
}

/// Sink forwarding every event into a channel
pub(crate) struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit_message(&self, message: &Message) -> std::result::Result<(), String> {
        self.tx
            .send(SinkEvent::Message(message.id))
            .map_err(|e| e.to_string())
    }

    async fn emit_state(&self, state: ConnectionState) -> std::result::Result<(), String> {
        self.tx.send(SinkEvent::State(state)).map_err(|e| e.to_string())
    }

    async fn emit_session_bound(&self, session: &Session) -> std::result::Result<(), String> {
        self.tx
            .send(SinkEvent::Bound(session.clone()))
            .map_err(|e| e.to_string())
    }
}
