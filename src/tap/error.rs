use thiserror::Error;

/// Errors that can occur when talking to a TAP service
#[derive(Debug, Error)]
pub enum TapError {
    /// Endpoint URL is malformed (missing scheme or host, unsupported scheme)
    #[error("Invalid endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    /// Programmer error (empty query text, inconsistent table construction)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Network-level failure: unreachable host, dropped connection, expired
    /// timeout. The only retryable category; the crate itself never retries.
    #[error("Connection error: {reason}")]
    Connection { reason: String },

    /// Non-2xx HTTP response that is not a TAP query rejection
    #[error("Service error (HTTP {status}): {message}")]
    Service { status: u16, message: String },

    /// The service rejected the ADQL text; carries the service diagnostic
    #[error("Malformed query: {0}")]
    MalformedQuery(String),

    /// Response payload did not match the expected tabular schema
    #[error("Parse error at line {line}: {detail}")]
    Parse { line: u64, detail: String },

    /// Results were requested from a job that has not completed
    #[error("Job is not complete (state: {state})")]
    JobNotComplete { state: String },

    /// Tables with differing column name/type sequences cannot be combined
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Row or column index outside the table bounds
    #[error("Index out of range: {0}")]
    IndexOutOfRange(String),

    /// Column name not present in the table schema
    #[error("Unknown column '{0}'")]
    UnknownColumn(String),

    /// Cancellation requested on a job already in a terminal state
    #[error("Job already terminal (state: {state})")]
    AlreadyTerminal { state: String },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Type alias for Results using TapError
pub type Result<T> = std::result::Result<T, TapError>;
