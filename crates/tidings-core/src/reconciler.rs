//! Message reconciler
//!
//! Owns the canonical message sequence: unique ids, newest (highest id)
//! first. REST pages and live events are merged with one rule, insert if
//! absent, so overlap between a page and the stream or a server redelivery
//! never shows twice.
//!
//! Network calls happen outside the lock. Each page request remembers the
//! generation it started under; [`Reconciler::clear`] and a successful
//! [`Reconciler::delete_all`] start a new generation so responses that
//! belong to the previous one are dropped instead of applied.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use crate::connection::ConnectionState;
use crate::error::Result;
use crate::events::EventSink;
use crate::message::{Message, Paging};
use crate::rest::HistoryApi;
use crate::session::Session;

/// How a page response was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// Most recent full reload: the sequence was replaced
    Replaced { len: usize },
    /// Partial or superseded page: new ids were inserted
    Merged { inserted: usize },
    /// The session or history changed while the request was in flight
    Discarded,
}

/// Result of [`Reconciler::load_page`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLoad {
    pub outcome: PageOutcome,
    pub paging: Paging,
}

#[derive(Debug, Default)]
struct Ledger {
    /// Sorted by id, descending
    messages: Vec<Message>,
    generation: u64,
    /// Ticket of the most recently issued full reload
    latest_reload: u64,
    reloads_in_flight: usize,
    pages_in_flight: usize,
    /// Messages merged while a full reload is pending
    journal: Vec<Message>,
    /// Ids deleted while a page is pending
    tombstones: HashSet<i64>,
}

impl Ledger {
    fn position(&self, id: i64) -> std::result::Result<usize, usize> {
        self.messages.binary_search_by(|probe| id.cmp(&probe.id))
    }

    fn insert_if_absent(&mut self, message: Message) -> bool {
        match self.position(message.id) {
            Ok(_) => false,
            Err(index) => {
                self.messages.insert(index, message);
                true
            }
        }
    }

    /// Merge rule shared by live events and non-replacing pages
    ///
    /// Tombstoned ids are refused. While a full reload is pending the
    /// message is also journaled so the reload cannot drop it.
    fn admit(&mut self, message: Message) -> bool {
        if self.tombstones.contains(&message.id) {
            return false;
        }
        if self.reloads_in_flight > 0 && !self.journal.iter().any(|m| m.id == message.id) {
            self.journal.push(message.clone());
        }
        self.insert_if_absent(message)
    }

    fn remove(&mut self, id: i64) -> bool {
        match self.position(id) {
            Ok(index) => {
                self.messages.remove(index);
                true
            }
            Err(_) => false,
        }
    }

    fn replace(&mut self, mut page: Vec<Message>) {
        page.retain(|m| !self.tombstones.contains(&m.id));
        page.sort_by(|a, b| b.id.cmp(&a.id));
        page.dedup_by_key(|m| m.id);
        self.messages = page;
    }

    fn finish_page(&mut self, full: bool) {
        self.pages_in_flight = self.pages_in_flight.saturating_sub(1);
        if full {
            self.reloads_in_flight = self.reloads_in_flight.saturating_sub(1);
        }
        if self.reloads_in_flight == 0 {
            self.journal.clear();
        }
        if self.pages_in_flight == 0 {
            self.tombstones.clear();
        }
    }

    fn reset(&mut self) {
        self.generation += 1;
        self.messages.clear();
        self.journal.clear();
        self.tombstones.clear();
    }
}

/// Canonical, deduplicated, newest-first message sequence
///
/// Cheap to clone; clones share the same sequence.
#[derive(Clone)]
pub struct Reconciler {
    api: Arc<dyn HistoryApi>,
    ledger: Arc<Mutex<Ledger>>,
    snapshot: Arc<watch::Sender<Vec<Message>>>,
}

impl Reconciler {
    pub fn new(api: Arc<dyn HistoryApi>) -> Self {
        let (snapshot, _rx) = watch::channel(Vec::new());
        Self {
            api,
            ledger: Arc::new(Mutex::new(Ledger::default())),
            snapshot: Arc::new(snapshot),
        }
    }

    /// Observe the sequence; every mutation publishes a new snapshot
    pub fn subscribe(&self) -> watch::Receiver<Vec<Message>> {
        self.snapshot.subscribe()
    }

    /// Current sequence
    pub async fn snapshot(&self) -> Vec<Message> {
        self.ledger.lock().await.messages.clone()
    }

    pub async fn len(&self) -> usize {
        self.ledger.lock().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ledger.lock().await.messages.is_empty()
    }

    /// Highest id held, the `since` cursor for catching up
    pub async fn newest_id(&self) -> Option<i64> {
        self.ledger.lock().await.messages.first().map(|m| m.id)
    }

    /// Fetch one history page and fold it into the sequence
    ///
    /// `since` of `None` or `0` is a full reload: the most recent one replaces
    /// the sequence and then re-applies messages merged (live or from other
    /// pages) while it was in flight. Any other page (or a full reload overtaken by a newer
    /// one) is merged.
    pub async fn load_page(&self, limit: u32, since: Option<i64>) -> Result<PageLoad> {
        let since = since.filter(|s| *s > 0);
        let full = since.is_none();

        let (generation, ticket) = {
            let mut ledger = self.ledger.lock().await;
            ledger.pages_in_flight += 1;
            if full {
                ledger.latest_reload += 1;
                ledger.reloads_in_flight += 1;
            }
            (ledger.generation, ledger.latest_reload)
        };

        let response = self.api.list_messages(limit, since).await;

        let mut ledger = self.ledger.lock().await;
        let page = match response {
            Ok(page) => page,
            Err(e) => {
                ledger.finish_page(full);
                return Err(e);
            }
        };

        let outcome = if ledger.generation != generation {
            debug!("Dropping page from a previous generation");
            PageOutcome::Discarded
        } else if full && ticket == ledger.latest_reload {
            ledger.replace(page.messages);
            let journal = std::mem::take(&mut ledger.journal);
            for message in journal.iter().cloned() {
                ledger.insert_if_absent(message);
            }
            // Other reloads still pending keep journaling from here on.
            ledger.journal = journal;
            PageOutcome::Replaced {
                len: ledger.messages.len(),
            }
        } else {
            let mut inserted = 0;
            for message in page.messages {
                if ledger.admit(message) {
                    inserted += 1;
                }
            }
            PageOutcome::Merged { inserted }
        };
        ledger.finish_page(full);

        if outcome != PageOutcome::Discarded {
            self.publish(&ledger);
        }
        Ok(PageLoad {
            outcome,
            paging: page.paging,
        })
    }

    /// Insert a live message unless its id is already present
    ///
    /// A redelivery of a message deleted while a page was pending is refused.
    pub async fn ingest_live(&self, message: Message) -> bool {
        let mut ledger = self.ledger.lock().await;
        let id = message.id;
        if ledger.admit(message) {
            self.publish(&ledger);
            true
        } else {
            debug!("Message {} already present or deleted", id);
            false
        }
    }

    /// Delete on the server, then locally
    ///
    /// On failure nothing changes locally. Returns whether an entry was
    /// removed.
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let generation = self.ledger.lock().await.generation;
        self.api.delete_message(id).await?;

        let mut ledger = self.ledger.lock().await;
        if ledger.generation != generation {
            return Ok(false);
        }
        if ledger.pages_in_flight > 0 {
            ledger.tombstones.insert(id);
        }
        ledger.journal.retain(|m| m.id != id);
        let removed = ledger.remove(id);
        if removed {
            self.publish(&ledger);
        }
        Ok(removed)
    }

    /// Delete everything on the server, then clear locally
    pub async fn delete_all(&self) -> Result<()> {
        let generation = self.ledger.lock().await.generation;
        self.api.delete_all_messages().await?;

        let mut ledger = self.ledger.lock().await;
        if ledger.generation == generation {
            ledger.reset();
            self.publish(&ledger);
            info!("Deleted all messages");
        }
        Ok(())
    }

    /// Local reset with no network call
    pub async fn clear(&self) {
        let mut ledger = self.ledger.lock().await;
        ledger.reset();
        self.publish(&ledger);
    }

    fn publish(&self, ledger: &Ledger) {
        self.snapshot.send_replace(ledger.messages.clone());
    }
}

#[async_trait]
impl EventSink for Reconciler {
    async fn emit_message(&self, message: &Message) -> std::result::Result<(), String> {
        self.ingest_live(message.clone()).await;
        Ok(())
    }

    async fn emit_state(&self, _state: ConnectionState) -> std::result::Result<(), String> {
        Ok(())
    }

    async fn emit_session_bound(&self, _session: &Session) -> std::result::Result<(), String> {
        self.clear().await;
        Ok(())
    }
}
