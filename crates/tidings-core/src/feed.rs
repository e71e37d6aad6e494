//! Notification feed
//!
//! Wires a [`Supervisor`] to a [`Reconciler`]: live messages are merged as
//! they arrive, a session change clears the sequence and reloads history for
//! the new session, and a reconnect after a failure fetches what was missed
//! in between.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::connection::ConnectionState;
use crate::error::Result;
use crate::events::EventSink;
use crate::message::Message;
use crate::reconciler::{PageLoad, Reconciler};
use crate::rest::HistoryApi;
use crate::session::{Session, StreamTarget};
use crate::supervisor::Supervisor;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HistoryRequest {
    Reload,
    CatchUp,
}

/// Sink installed on the supervisor by [`NotificationFeed`]
struct FeedSink {
    reconciler: Reconciler,
    requests: mpsc::UnboundedSender<HistoryRequest>,
    catch_up: bool,
    interrupted: AtomicBool,
}

impl FeedSink {
    fn request(&self, request: HistoryRequest) {
        if self.requests.send(request).is_err() {
            debug!("History worker gone, dropping {:?}", request);
        }
    }
}

#[async_trait]
impl EventSink for FeedSink {
    async fn emit_message(&self, message: &Message) -> std::result::Result<(), String> {
        self.reconciler.ingest_live(message.clone()).await;
        Ok(())
    }

    async fn emit_state(&self, state: ConnectionState) -> std::result::Result<(), String> {
        match state {
            ConnectionState::Backoff(_) => self.interrupted.store(true, Ordering::SeqCst),
            ConnectionState::Open => {
                if self.interrupted.swap(false, Ordering::SeqCst) && self.catch_up {
                    self.request(HistoryRequest::CatchUp);
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn emit_session_bound(&self, session: &Session) -> std::result::Result<(), String> {
        self.interrupted.store(false, Ordering::SeqCst);
        self.reconciler.clear().await;
        if session.is_active() {
            self.request(HistoryRequest::Reload);
        }
        Ok(())
    }
}

/// Live, deduplicated view of a user's (or a topic's) notifications
pub struct NotificationFeed {
    reconciler: Reconciler,
    supervisor: Supervisor,
    worker: JoinHandle<()>,
    page_limit: u32,
}

impl NotificationFeed {
    /// Start streaming and loading history; must be called inside a tokio
    /// runtime
    pub fn start(
        config: &FeedConfig,
        sessions: watch::Receiver<Session>,
        api: Arc<dyn HistoryApi>,
        transport: Arc<dyn Transport>,
        target: StreamTarget,
    ) -> Self {
        let reconciler = Reconciler::new(api);
        let (requests, request_rx) = mpsc::unbounded_channel();
        let page_limit = config.history.page_limit;

        let worker = tokio::spawn(run_history_worker(
            reconciler.clone(),
            request_rx,
            page_limit,
        ));
        let sink = FeedSink {
            reconciler: reconciler.clone(),
            requests,
            catch_up: config.history.catch_up_on_reconnect,
            interrupted: AtomicBool::new(false),
        };
        let supervisor =
            Supervisor::spawn(&config.stream, target, sessions, transport, Arc::new(sink));

        Self {
            reconciler,
            supervisor,
            worker,
            page_limit,
        }
    }

    /// Start over the network with the REST client and WebSocket transport
    #[cfg(feature = "websocket")]
    pub fn connect(
        config: &FeedConfig,
        provider: &crate::session::SessionProvider,
        target: StreamTarget,
    ) -> Self {
        let api = crate::rest::RestClient::new(provider.subscribe(), target.clone());
        let transport = crate::transport::WsTransport::new(config.stream.event_buffer);
        Self::start(
            config,
            provider.subscribe(),
            Arc::new(api),
            Arc::new(transport),
            target,
        )
    }

    /// Reload the newest page, replacing the sequence
    pub async fn refresh(&self) -> Result<PageLoad> {
        self.reconciler.load_page(self.page_limit, None).await
    }

    pub async fn load_page(&self, limit: u32, since: Option<i64>) -> Result<PageLoad> {
        self.reconciler.load_page(limit, since).await
    }

    pub async fn delete(&self, id: i64) -> Result<bool> {
        self.reconciler.delete(id).await
    }

    pub async fn delete_all(&self) -> Result<()> {
        self.reconciler.delete_all().await
    }

    /// Current sequence, newest first
    pub async fn messages(&self) -> Vec<Message> {
        self.reconciler.snapshot().await
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Message>> {
        self.reconciler.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.supervisor.subscribe_state()
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Tear the stream down and stop background history loads
    pub async fn shutdown(self) {
        self.supervisor.teardown().await;
        self.worker.abort();
    }
}

async fn run_history_worker(
    reconciler: Reconciler,
    mut requests: mpsc::UnboundedReceiver<HistoryRequest>,
    page_limit: u32,
) {
    while let Some(request) = requests.recv().await {
        match serve(&reconciler, request, page_limit).await {
            Ok(()) => {}
            Err(e) if e.is_unauthorized() => {
                warn!("History {:?} rejected, session is no longer valid: {}", request, e)
            }
            Err(e) => warn!("History {:?} failed: {}", request, e),
        }
    }
}

async fn serve(reconciler: &Reconciler, request: HistoryRequest, page_limit: u32) -> Result<()> {
    let since = match request {
        HistoryRequest::Reload => None,
        HistoryRequest::CatchUp => reconciler.newest_id().await,
    };
    let load = reconciler.load_page(page_limit, since).await?;
    debug!("{:?} applied: {:?}", request, load.outcome);

    // A full page may not reach back to the newest id we held; older ids
    // could be missing below it.
    if since.is_some() && load.paging.size >= i64::from(page_limit) {
        info!("Catch-up page is full, reloading history");
        let load = reconciler.load_page(page_limit, None).await?;
        debug!("Reload after catch-up applied: {:?}", load.outcome);
    }
    Ok(())
}
