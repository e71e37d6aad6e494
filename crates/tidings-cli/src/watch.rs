//! Long-running commands: `watch` and `tail`

use std::collections::HashSet;
use std::sync::Arc;
use tidings_core::events::format_message;
use tidings_core::{
    AppError, FeedConfig, Message, NotificationFeed, Result, SessionProvider, StdoutEventSink,
    StreamTarget, Supervisor, WsTransport,
};
use tracing::info;

/// Follow the feed: history first, then new messages, until Ctrl-C
pub async fn run_watch(
    config: &FeedConfig,
    provider: &SessionProvider,
    target: StreamTarget,
    json_output: bool,
) -> Result<()> {
    let session = provider.current();
    if !session.is_active() {
        return Err(AppError::NotAuthenticated);
    }
    session.base_url()?;

    info!("Watching {} on {}", target, session.server_address);
    let feed = NotificationFeed::connect(config, provider, target);
    let mut messages = feed.subscribe();
    let mut states = feed.subscribe_state();
    let mut unseen = Unseen::default();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,

            changed = messages.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = messages.borrow_and_update().clone();
                for message in unseen.take(&snapshot) {
                    println!("{}", format_message(&message, json_output));
                }
            }

            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                info!("Stream {}", state);
            }
        }
    }

    info!("Shutting down");
    feed.shutdown().await;
    Ok(())
}

/// Print live messages only, until Ctrl-C
pub async fn run_tail(
    config: &FeedConfig,
    provider: &SessionProvider,
    target: StreamTarget,
    json_output: bool,
) -> Result<()> {
    let session = provider.current();
    if !session.is_active() {
        return Err(AppError::NotAuthenticated);
    }
    session.base_url()?;

    let supervisor = Supervisor::spawn(
        &config.stream,
        target,
        provider.subscribe(),
        Arc::new(WsTransport::new(config.stream.event_buffer)),
        Arc::new(StdoutEventSink::new(json_output)),
    );

    let interrupted = tokio::signal::ctrl_c().await;
    supervisor.teardown().await;
    interrupted?;
    Ok(())
}

/// Picks out messages not printed yet
#[derive(Debug, Default)]
struct Unseen {
    printed: HashSet<i64>,
}

impl Unseen {
    /// Messages in `snapshot` not returned before, oldest first
    fn take(&mut self, snapshot: &[Message]) -> Vec<Message> {
        let mut fresh: Vec<Message> = snapshot
            .iter()
            .filter(|m| self.printed.insert(m.id))
            .cloned()
            .collect();
        fresh.reverse();
        fresh
    }
}
