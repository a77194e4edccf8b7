//! Package-level constants and fixed timing values.

use std::time::Duration;

/// Current SDK version (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Header carrying the SDK version on every HTTP request.
pub const SDK_VERSION_HEADER: &str = "x-parley-sdk-version";

/// Fallback text for Failure responses when the config does not override it.
pub const DEFAULT_FAILURE_TEXT: &str = "We encountered an issue. Please try again soon.";

/// Interval between socket queue flush ticks. One queued frame is sent per
/// tick — a deliberate backpressure and ordering control.
pub const SOCKET_FLUSH_INTERVAL: Duration = Duration::from_millis(500);

/// Delay before reattempting a dropped socket connection.
pub const SOCKET_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Fixed delay before dispatching a `{poll: true}` follow-up after the
/// backend signals a pending data request.
pub const POLL_RETRY_DELAY: Duration = Duration::from_millis(1500);

/// Default window for `await_response` before it unsubscribes and rejects.
pub const AWAIT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
