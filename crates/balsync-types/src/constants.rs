//! System-wide constants and defaults.

/// Maximum decimal places carried by a balance amount.
pub const BALANCE_PRECISION: u32 = 8;

/// Default base delay for recovery backoff in milliseconds.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 250;

/// Default cap on a single recovery backoff delay in milliseconds.
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Default backoff multiplier per failed attempt.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default jitter applied to each delay (fraction of the delay, ±).
pub const DEFAULT_BACKOFF_JITTER: f64 = 0.2;

/// Default timeout for the account snapshot call in milliseconds.
pub const DEFAULT_SNAPSHOT_TIMEOUT_MS: u64 = 10_000;

/// Default timeout for session open/keepalive/close calls in milliseconds.
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 5_000;

/// Default timeout for establishing a stream subscription in milliseconds.
pub const DEFAULT_SUBSCRIBE_TIMEOUT_MS: u64 = 10_000;

/// Default upper bound on the keepalive period in milliseconds (30 minutes).
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 30 * 60 * 1000;

/// Default session validity when the server does not advertise one (60 minutes).
pub const DEFAULT_SESSION_VALIDITY_MS: u64 = 60 * 60 * 1000;

/// Consecutive transient keepalive failures treated as session loss.
pub const DEFAULT_MAX_KEEPALIVE_FAILURES: u32 = 3;

/// Default capacity of the frame channel between transport and consumer.
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// During a recovery episode, log every Nth failed attempt at WARN.
pub const RETRY_LOG_EVERY: u32 = 10;

/// Stream event type carrying the full state of changed assets.
pub const EVENT_ACCOUNT_POSITION: &str = "outboundAccountPosition";

/// Legacy stream event type carrying the full account state.
pub const EVENT_ACCOUNT_INFO: &str = "outboundAccountInfo";

/// Stream event type announcing that the session token expired.
pub const EVENT_SESSION_EXPIRED: &str = "listenKeyExpired";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "BalSync";
