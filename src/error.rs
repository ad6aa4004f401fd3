use thiserror::Error;

/// Unified error type for the aggregation pipeline
#[derive(Error, Debug)]
pub enum SubError {
    // Input errors
    #[error("Invalid subscription URL: {0}")]
    InvalidUrl(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    // Network errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Endpoint returned {bytes} bytes, below the minimum")]
    EmptyBody { bytes: usize },

    #[error("Operation timed out")]
    Timeout,

    // Source state
    #[error("Source {url} is rate limited: {reason}")]
    RateLimited { url: String, reason: String },

    #[error("Source {url} is in backoff")]
    BackedOff { url: String },

    #[error("Source exhausted: {0}")]
    Exhausted(String),

    // Decode errors
    #[error("No nodes decoded from {url}")]
    NoNodes { url: String },

    #[error("Decode paths disagree for {url} and every conversion fallback failed")]
    DecodeAmbiguous { url: String },

    #[error("Conversion service failed: {0}")]
    ConverterFailed(String),

    // Credential errors
    #[error("No API credentials configured")]
    NoCredentials,

    #[error("All credentials exhausted after {attempts} attempts")]
    AllCredentialsExhausted { attempts: u32 },

    #[error("Quota probe failed: {0}")]
    QuotaProbe(String),

    // Run errors
    #[error("No usable subscription source in this run")]
    NoUsableSources,

    #[error("Run cancelled")]
    Cancelled,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Storage / serialization
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, SubError>;

/// Failure classes the pipeline reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad candidate or payload; dropped silently
    MalformedInput,
    /// Timeouts, connection failures, unexpected statuses; retried next run
    TransientNetwork,
    /// Source answered with a rate-limit signal; drives backoff
    RateLimited,
    /// Decode paths disagreed and no fallback resolved it
    DecodeAmbiguity,
    /// No key has quota left
    CredentialExhaustion,
    /// Durable state could not be read or written
    Storage,
    /// Aborts the run
    Fatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedInput => "malformed_input",
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::DecodeAmbiguity => "decode_ambiguity",
            ErrorKind::CredentialExhaustion => "credential_exhaustion",
            ErrorKind::Storage => "storage",
            ErrorKind::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl SubError {
    /// Classify this error for containment decisions
    pub fn kind(&self) -> ErrorKind {
        match self {
            SubError::InvalidUrl(_)
            | SubError::MalformedPayload(_)
            | SubError::NoNodes { .. }
            | SubError::Exhausted(_) => ErrorKind::MalformedInput,

            SubError::Http(_)
            | SubError::HttpStatus { .. }
            | SubError::EmptyBody { .. }
            | SubError::Timeout
            | SubError::ConverterFailed(_)
            | SubError::QuotaProbe(_) => ErrorKind::TransientNetwork,

            SubError::RateLimited { .. } | SubError::BackedOff { .. } => ErrorKind::RateLimited,

            SubError::DecodeAmbiguous { .. } => ErrorKind::DecodeAmbiguity,

            SubError::NoCredentials | SubError::AllCredentialsExhausted { .. } => {
                ErrorKind::CredentialExhaustion
            }

            SubError::Io(_) | SubError::Json(_) | SubError::Yaml(_) => ErrorKind::Storage,

            SubError::NoUsableSources
            | SubError::Cancelled
            | SubError::InvalidConfig(_)
            | SubError::Internal(_) => ErrorKind::Fatal,
        }
    }

    /// Whether a later run may succeed where this one failed
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransientNetwork | ErrorKind::RateLimited
        )
    }

    /// Map a reqwest error, keeping timeouts distinguishable
    pub fn from_request(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SubError::Timeout
        } else {
            SubError::Http(err)
        }
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for SubError {
    fn from(err: url::ParseError) -> Self {
        SubError::InvalidUrl(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for SubError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        SubError::Timeout
    }
}
