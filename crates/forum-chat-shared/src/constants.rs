/// Application name
pub const APP_NAME: &str = "forum-chat";

/// Default REST API base URL (local development backend)
pub const DEFAULT_API_URL: &str = "http://localhost:8000/api/v1";

/// Default realtime endpoint
pub const DEFAULT_WS_URL: &str = "ws://localhost:8000/api/v1/ws/connect";

/// Default HTTP request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Capacity of the realtime delivery channel
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Maximum message length in characters
pub const MAX_MESSAGE_CHARS: usize = 999;

/// Username length bounds (inclusive)
pub const MIN_USERNAME_CHARS: usize = 2;
pub const MAX_USERNAME_CHARS: usize = 30;

/// Credentials file name inside the data directory
pub const CREDENTIALS_FILE: &str = "credentials.json";
