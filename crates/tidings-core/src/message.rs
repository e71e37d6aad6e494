//! Notification message types
//!
//! The wire shape shared by the REST history endpoints and the live stream.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A delivered notification
///
/// Messages are immutable once received. `id` is server-assigned, increases
/// monotonically and is the only key used for deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    /// Application the message was posted through
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appid: Option<i64>,
    /// Topic the message was published to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Body text
    #[serde(default)]
    pub message: String,
    /// 0-10, display only
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Server creation time as sent on the wire
    #[serde(default)]
    pub date: String,
}

/// Where a message came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Application(i64),
    Topic(String),
    Unknown,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Application(id) => write!(f, "app:{id}"),
            Source::Topic(name) => write!(f, "topic:{name}"),
            Source::Unknown => write!(f, "unknown"),
        }
    }
}

impl Message {
    /// Parse one inbound stream frame
    ///
    /// Returns `None` for anything that is not a message (keep-alives,
    /// server hellos, truncated frames).
    pub fn from_frame(frame: &str) -> Option<Self> {
        serde_json::from_str(frame).ok()
    }

    /// Application or topic this message belongs to
    pub fn source(&self) -> Source {
        match (&self.appid, &self.topic) {
            (Some(id), _) => Source::Application(*id),
            (None, Some(topic)) => Source::Topic(topic.clone()),
            (None, None) => Source::Unknown,
        }
    }

    /// Creation time parsed from `date`
    ///
    /// Accepts RFC 3339 and the `YYYY-MM-DD HH:MM:SS` form the server stores
    /// (interpreted as UTC).
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&self.date) {
            return Some(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&self.date, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

/// One page of REST history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagedMessages {
    pub messages: Vec<Message>,
    pub paging: Paging,
}

/// Paging metadata returned alongside a history page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    pub size: i64,
    pub since: i64,
    pub limit: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_frame_app_message() {
        let frame = r#"{"id":42,"appid":7,"title":"Backup","message":"done","priority":5,"date":"2024-03-01T10:00:00Z"}"#;
        let msg = Message::from_frame(frame).unwrap();
        assert_eq!(msg.id, 42);
        assert_eq!(msg.source(), Source::Application(7));
        assert_eq!(msg.title.as_deref(), Some("Backup"));
        assert_eq!(msg.priority, 5);
    }

    #[test]
    fn test_from_frame_topic_message_keeps_extras() {
        let frame = r#"{"id":3,"topic":"alerts","message":"disk full","priority":8,
            "tags":["warning","disk"],"extras":{"client::display":{"contentType":"text/markdown"}},
            "actions":[{"action":"view","label":"Open","url":"https://example.com"}],
            "date":"2024-03-01 10:00:00"}"#;
        let msg = Message::from_frame(frame).unwrap();
        assert_eq!(msg.source(), Source::Topic("alerts".to_string()));
        assert_eq!(msg.tags.as_ref().unwrap(), &vec!["warning".to_string(), "disk".to_string()]);
        assert_eq!(msg.extras.as_ref().unwrap()["client::display"]["contentType"], "text/markdown");
        assert!(msg.actions.as_ref().unwrap().is_array());
    }

    #[test]
    fn test_from_frame_rejects_keep_alive() {
        assert!(Message::from_frame("ping").is_none());
        assert!(Message::from_frame("").is_none());
        assert!(Message::from_frame(r#"{"type":"keepalive"}"#).is_none());
    }

    #[test]
    fn test_unknown_source() {
        let msg = Message::from_frame(r#"{"id":1,"message":"hi"}"#).unwrap();
        assert_eq!(msg.source(), Source::Unknown);
        assert_eq!(msg.source().to_string(), "unknown");
    }

    #[test]
    fn test_timestamp_formats() {
        let mut msg = Message::from_frame(r#"{"id":1,"message":"hi","date":"2024-03-01T10:00:00+02:00"}"#).unwrap();
        assert_eq!(msg.timestamp().unwrap().to_rfc3339(), "2024-03-01T08:00:00+00:00");

        msg.date = "2024-03-01 10:00:00".to_string();
        assert_eq!(msg.timestamp().unwrap().to_rfc3339(), "2024-03-01T10:00:00+00:00");

        msg.date = "yesterday".to_string();
        assert!(msg.timestamp().is_none());
    }

    #[test]
    fn test_paged_messages_deserialize() {
        let json = r#"{"messages":[{"id":2,"message":"b"},{"id":1,"message":"a"}],
            "paging":{"size":2,"since":0,"limit":100}}"#;
        let page: PagedMessages = serde_json::from_str(json).unwrap();
        assert_eq!(page.messages.len(), 2);
        assert_eq!(page.paging.limit, 100);
    }
}
