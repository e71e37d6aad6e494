//! Session credentials and endpoint derivation
//!
//! A [`Session`] is a snapshot of what the credential store currently holds.
//! [`SessionProvider`] is the reactive handle the host updates on login,
//! logout, token refresh or server switch; the supervisor and the REST client
//! each hold a receiver and read the latest value when they need it.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

use crate::error::{AppError, Result};

/// Bearer token plus base server address
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: Option<String>,
    pub server_address: String,
}

// Tokens stay out of logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("server_address", &self.server_address)
            .finish()
    }
}

/// Which live feed to follow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum StreamTarget {
    /// Every message visible to the user
    User,
    /// A single topic
    Topic(String),
}

impl fmt::Display for StreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamTarget::User => write!(f, "user"),
            StreamTarget::Topic(name) => write!(f, "topic:{name}"),
        }
    }
}

impl Session {
    pub fn new(server_address: impl Into<String>, token: Option<String>) -> Self {
        Self {
            token,
            server_address: server_address.into(),
        }
    }

    /// A session with an address but no credentials
    pub fn signed_out(server_address: impl Into<String>) -> Self {
        Self::new(server_address, None)
    }

    /// Whether a connection may be attempted with this session
    pub fn is_active(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Base HTTP(S) URL of the server
    pub fn base_url(&self) -> Result<Url> {
        let trimmed = self.server_address.trim().trim_end_matches('/');
        let url = Url::parse(trimmed)
            .map_err(|e| AppError::InvalidAddress(format!("{trimmed}: {e}")))?;
        match url.scheme() {
            "http" | "https" | "ws" | "wss" => Ok(url),
            other => Err(AppError::InvalidAddress(format!(
                "unsupported scheme '{other}' in {trimmed}"
            ))),
        }
    }

    /// Real-time endpoint for `target`, token in the query
    ///
    /// `http` becomes `ws` and `https` becomes `wss`.
    pub fn stream_url(&self, target: &StreamTarget) -> Result<Url> {
        let token = self
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(AppError::NotAuthenticated)?;

        let mut url = self.base_url()?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            _ => "wss",
        };
        url.set_scheme(scheme)
            .map_err(|_| AppError::InvalidAddress(self.server_address.clone()))?;

        match target {
            StreamTarget::User => push_segments(&mut url, &["stream"])?,
            StreamTarget::Topic(name) => push_segments(&mut url, &["api", "topics", name, "ws"])?,
        }
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }

    /// REST history endpoint for `target` (no query)
    pub fn history_url(&self, target: &StreamTarget) -> Result<Url> {
        let mut url = self.base_url()?;
        match target {
            StreamTarget::User => push_segments(&mut url, &["message"])?,
            StreamTarget::Topic(name) => {
                push_segments(&mut url, &["api", "topics", name, "messages"])?
            }
        }
        Ok(url)
    }

    /// REST endpoint for a single message
    pub fn message_url(&self, id: i64) -> Result<Url> {
        let mut url = self.base_url()?;
        push_segments(&mut url, &["message", &id.to_string()])?;
        Ok(url)
    }
}

fn push_segments(url: &mut Url, segments: &[&str]) -> Result<()> {
    let address = url.to_string();
    url.path_segments_mut()
        .map_err(|_| AppError::InvalidAddress(address))?
        .pop_if_empty()
        .extend(segments);
    Ok(())
}

/// Strip the query (and with it the token) for logging
pub fn redact_url(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

/// Reactive credential holder
///
/// Every mutation notifies subscribers; identical values are not
/// re-broadcast.
#[derive(Debug, Clone)]
pub struct SessionProvider {
    tx: watch::Sender<Session>,
}

impl SessionProvider {
    pub fn new(initial: Session) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Session {
        self.tx.borrow().clone()
    }

    /// Replace the whole session (login to another server, restore)
    pub fn replace(&self, session: Session) {
        self.tx.send_if_modified(|current| {
            if *current == session {
                false
            } else {
                *current = session;
                true
            }
        });
    }

    /// Store a new token (login, refresh)
    pub fn set_token(&self, token: impl Into<String>) {
        let token = token.into();
        self.update(|session| session.token = Some(token));
    }

    /// Forget the token (logout, or a 401 from the REST API)
    pub fn logout(&self) {
        self.update(|session| session.token = None);
    }

    /// Point at another server, keeping the token
    pub fn switch_server(&self, server_address: impl Into<String>) {
        let address = server_address.into();
        self.update(|session| session.server_address = address);
    }

    fn update(&self, change: impl FnOnce(&mut Session)) {
        let mut next = self.current();
        change(&mut next);
        self.replace(next);
    }
}
