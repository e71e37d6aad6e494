/// Whether the live stream is enabled
pub const DEFAULT_STREAM_ENABLED: bool = true;

/// First reconnect delay (milliseconds)
pub const DEFAULT_BACKOFF_FLOOR_MS: u64 = 1_000;

/// Upper bound for the reconnect delay (milliseconds)
pub const DEFAULT_BACKOFF_CEILING_MS: u64 = 30_000;

/// Transport events buffered between the socket reader and the supervisor
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Messages requested per history page
pub const DEFAULT_PAGE_LIMIT: u32 = 100;

/// Largest page the server will return
pub const MAX_PAGE_LIMIT: u32 = 500;

/// Fetch messages missed during an outage after reconnecting
pub const DEFAULT_CATCH_UP_ON_RECONNECT: bool = true;

/// Directory under the platform config dir
pub const CONFIG_DIR_NAME: &str = "tidings";

/// Config file name
pub const CONFIG_FILE_NAME: &str = "config.json";
