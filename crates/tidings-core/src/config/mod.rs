//! Feed configuration
//!
//! This module defines configuration types and default values:
//! - `feed_config`: Configuration structure and file loading
//! - `defaults`: Default configuration values

pub mod defaults;
pub mod feed_config;

// Re-export configuration types
pub use feed_config::{FeedConfig, HistoryConfig, StreamConfig};
