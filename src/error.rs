//! Top-level error types for threadrelay.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum covering every failure a relay cycle can surface.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed trigger payload. Raised before any network call.
    #[error("invalid trigger payload: {0}")]
    Validation(String),

    /// A permalink that does not point at a message.
    #[error("invalid message reference: {0}")]
    InvalidReference(String),

    #[error("message {ts} not found in channel {channel}")]
    MessageNotFound { channel: String, ts: String },

    #[error("template error: {0}")]
    Template(String),

    #[error("failed to submit prompt to backend: {0}")]
    Submission(#[source] BackendError),

    /// The poll budget ran out before the backend produced a reply.
    #[error("backend did not respond in time ({elapsed_secs}s)")]
    Timeout { elapsed_secs: u64 },

    #[error("backend request failed: {0}")]
    Upstream(#[source] BackendError),

    #[error("slack API call failed: {0:#}")]
    Slack(anyhow::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// True for failures caused by the caller's input rather than by an
    /// upstream service. The ingress maps these to `400 Bad Request`.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::InvalidReference(_) | Error::Template(_)
        )
    }
}

/// Failures talking to the conversational backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The resource is not (yet) queryable. Transient while polling.
    #[error("resource not found (HTTP 404)")]
    NotFound,

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound)
    }
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),
}
