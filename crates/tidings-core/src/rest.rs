//! REST history collaborator
//!
//! The reconciler only needs three calls: list a page, delete one message,
//! delete everything. [`HistoryApi`] is that seam; [`RestClient`] implements
//! it over HTTP and reads the session at call time, so a login or server
//! switch applies to the very next request.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::debug;

use crate::config::defaults::MAX_PAGE_LIMIT;
use crate::error::{AppError, Result};
use crate::message::PagedMessages;
use crate::session::{Session, StreamTarget};

/// History endpoints used by the reconciler
#[async_trait]
pub trait HistoryApi: Send + Sync {
    /// Newest-first page; `since` limits it to ids greater than `since`
    async fn list_messages(&self, limit: u32, since: Option<i64>) -> Result<PagedMessages>;

    async fn delete_message(&self, id: i64) -> Result<()>;

    async fn delete_all_messages(&self) -> Result<()>;
}

/// Error body returned by the server on non-2xx responses
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(rename = "errorCode")]
    error_code: Option<i64>,
}

/// HTTP implementation of [`HistoryApi`]
#[derive(Debug, Clone)]
pub struct RestClient {
    http: Client,
    session: watch::Receiver<Session>,
    target: StreamTarget,
}

impl RestClient {
    pub fn new(session: watch::Receiver<Session>, target: StreamTarget) -> Self {
        Self::with_client(Client::new(), session, target)
    }

    pub fn with_client(http: Client, session: watch::Receiver<Session>, target: StreamTarget) -> Self {
        Self {
            http,
            session,
            target,
        }
    }

    pub fn target(&self) -> &StreamTarget {
        &self.target
    }

    /// Current session, which must carry a token
    fn session(&self) -> Result<(Session, String)> {
        let session = self.session.borrow().clone();
        let token = session
            .token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(AppError::NotAuthenticated)?;
        Ok((session, token))
    }
}

#[async_trait]
impl HistoryApi for RestClient {
    async fn list_messages(&self, limit: u32, since: Option<i64>) -> Result<PagedMessages> {
        let (session, token) = self.session()?;
        let mut url = session.history_url(&self.target)?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.clamp(1, MAX_PAGE_LIMIT).to_string())
            .append_pair("since", &since.unwrap_or(0).max(0).to_string());

        debug!("GET {} ({})", url.path(), self.target);
        let response = self.http.get(url).bearer_auth(token).send().await?;
        let response = check_status(response).await?;
        Ok(response.json::<PagedMessages>().await?)
    }

    async fn delete_message(&self, id: i64) -> Result<()> {
        let (session, token) = self.session()?;
        let url = session.message_url(id)?;

        debug!("DELETE {}", url.path());
        let response = self.http.delete(url).bearer_auth(token).send().await?;
        check_status(response).await?;
        Ok(())
    }

    async fn delete_all_messages(&self) -> Result<()> {
        if let StreamTarget::Topic(name) = &self.target {
            return Err(AppError::Unsupported(format!(
                "delete-all is not available for topic '{name}'"
            )));
        }
        let (session, token) = self.session()?;
        let url = session.history_url(&StreamTarget::User)?;

        debug!("DELETE {}", url.path());
        let response = self.http.delete(url).bearer_auth(token).send().await?;
        check_status(response).await?;
        Ok(())
    }
}

/// Turn a non-2xx response into [`AppError::Api`]
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(api_error(status, &body))
}

fn api_error(status: StatusCode, body: &str) -> AppError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => AppError::Api {
            status: status.as_u16(),
            message: parsed.error,
            code: parsed.error_code.unwrap_or(i64::from(status.as_u16())),
        },
        Err(_) => AppError::Api {
            status: status.as_u16(),
            message: status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string(),
            code: i64::from(status.as_u16()),
        },
    }
}
