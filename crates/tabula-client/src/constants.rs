//! Client configuration constants.
//!
//! Centralizes defaults for [`ClientConfig`](crate::ClientConfig) and the
//! transports.

use std::time::Duration;

/// Default backend endpoint for local development.
pub const DEFAULT_ENDPOINT: &str = "127.0.0.1:7878";

/// Timeout for establishing the TCP connection. This is the only client-side
/// timer; job deadlines are enforced by the backend (`job-timeout`).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default user id when none is configured.
pub const DEFAULT_USER_ID: &str = "guest";

/// Config file name under the platform config directory.
pub const CONFIG_FILE_NAME: &str = "client.ron";

/// Application directory name under the platform config directory.
pub const CONFIG_DIR_NAME: &str = "tabula";

/// Maximum accepted size of one inbound frame (one JSON line).
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
