use thiserror::Error;

/// Error types for track resolution.
///
/// Network and parse failures are normally recovered by the resolver at the
/// smallest scope (one fetch, one query) and degrade to "zero candidates".
/// The remaining variants signal caller misuse or unusable input.
///
/// # Error Handling Examples
///
/// ```rust,no_run
/// use track_resolver::{PerformanceCollector, ResolverError};
///
/// let collector = PerformanceCollector::new();
/// collector.start_session().unwrap();
///
/// match collector.start_session() {
///     Err(ResolverError::SessionAlreadyOpen) => eprintln!("finish the current session first"),
///     Err(e) => eprintln!("Other error: {}", e),
///     Ok(()) => unreachable!(),
/// }
/// ```
#[derive(Error, Debug)]
pub enum ResolverError {
    /// The request did not complete within the configured per-fetch timeout.
    #[error("Request timed out after {timeout_ms} ms: {url}")]
    Timeout {
        /// URL that timed out
        url: String,
        /// The timeout that was applied
        timeout_ms: u64,
    },

    /// Connection failures, DNS errors, body read errors and other
    /// low-level networking issues.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote service answered with a non-success status code.
    #[error("HTTP status {code} for {url}")]
    HttpStatus {
        /// The status code returned
        code: u16,
        /// The URL that was requested
        url: String,
    },

    /// A search or detail page could not be understood.
    ///
    /// This happens when the remote layout changes or a page is truncated.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// The track had no usable title, so no search queries could be built.
    #[error("No search queries could be generated for track")]
    NoQueriesGenerated,

    /// `start_session()` was called while another session was still open.
    #[error("A performance session is already open")]
    SessionAlreadyOpen,

    /// A collector method that needs an open session was called without one.
    #[error("No performance session is open")]
    NoOpenSession,

    /// Metrics were recorded against a track id the session does not know.
    #[error("Unknown track id {0} in performance session")]
    UnknownTrack(u64),

    /// The operation observed the cancellation signal.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration values.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A URL could not be built or parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// File system I/O errors (config files, stats exports).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ResolverError {
    /// Whether another attempt at the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ResolverError::Timeout { .. }
                | ResolverError::Transport(_)
                | ResolverError::HttpStatus { .. }
        )
    }

    /// Network-side failures: timeouts, transport problems and bad statuses.
    pub fn is_network(&self) -> bool {
        self.is_retryable()
    }

    /// Failures the resolver recovers from locally by treating the affected
    /// fetch or query as yielding zero candidates.
    pub fn is_recoverable(&self) -> bool {
        self.is_network() || matches!(self, ResolverError::Parse(_))
    }
}
