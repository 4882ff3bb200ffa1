//! Shared configuration for tether clients.
//!
//! Values are layered by `ortho_config`: built-in defaults, then an optional
//! configuration file, then `TETHER_*` environment variables, then command
//! line flags. Durations are stored as whole milliseconds so every layer can
//! express them as plain integers.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

mod defaults;
mod logging;

pub use defaults::{
    DEFAULT_ACK_QUEUE_CAPACITY, DEFAULT_CALL_TIMEOUT_MS, DEFAULT_CLOSE_TIMEOUT_MS,
    DEFAULT_LOG_FILTER, DEFAULT_READY_TIMEOUT_MS, default_log_filter, default_log_filter_string,
    default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Resolved client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "TETHER")]
pub struct Config {
    /// `tracing` filter directive applied to client logs.
    #[ortho_config(default = defaults::default_log_filter_string())]
    pub log_filter: String,
    /// Output format of client logs.
    #[ortho_config(default = defaults::default_log_format())]
    pub log_format: LogFormat,
    /// Milliseconds to wait for the remote host to report readiness.
    #[ortho_config(default = DEFAULT_READY_TIMEOUT_MS)]
    pub ready_timeout_ms: u64,
    /// Milliseconds a unary remote call waits for its response.
    #[ortho_config(default = DEFAULT_CALL_TIMEOUT_MS)]
    pub call_timeout_ms: u64,
    /// Bound of the outbound acknowledgement queue; `0` means unbounded.
    #[ortho_config(default = DEFAULT_ACK_QUEUE_CAPACITY)]
    pub ack_queue_capacity: usize,
    /// Milliseconds `close` waits for the dispatch thread by default.
    #[ortho_config(default = DEFAULT_CLOSE_TIMEOUT_MS)]
    pub close_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            ready_timeout_ms: DEFAULT_READY_TIMEOUT_MS,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            ack_queue_capacity: DEFAULT_ACK_QUEUE_CAPACITY,
            close_timeout_ms: DEFAULT_CLOSE_TIMEOUT_MS,
        }
    }
}

impl Config {
    /// Filter directive for the log subscriber.
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Output format for the log subscriber.
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// How long to wait for the remote host to become ready.
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    /// How long a unary remote call waits for its response.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Capacity of the acknowledgement queue, `None` when unbounded.
    pub fn ack_queue_capacity(&self) -> Option<usize> {
        (self.ack_queue_capacity > 0).then_some(self.ack_queue_capacity)
    }

    /// Default timeout applied when closing a client.
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}
