/// Default log filter expression used by clients.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default time a client waits for the remote host to become ready.
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 15_000;

/// Default time a unary remote call waits for its response.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 15_000;

/// Default bound of the outbound acknowledgement queue.
pub const DEFAULT_ACK_QUEUE_CAPACITY: usize = 64;

/// Default time `close` waits for the dispatch thread to finish.
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 5_000;

/// Default log filter expression used by clients.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for clients.
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}
