use thiserror::Error;

/// Crucible application error types
///
/// Variants map one-to-one onto the wire-level `error_kind` strings returned
/// by the HTTP edge and recorded on case results.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {message}")]
    Invalid { message: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Forbidden: missing capability {capability}")]
    Forbidden { capability: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Stale version: expected {expected}, current is {current}")]
    StaleVersion { expected: u32, current: u32 },

    #[error("Illegal transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Timed out: {operation}")]
    Timeout { operation: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Rate limited")]
    RateLimited,

    #[error("Circuit open")]
    CircuitOpen,

    #[error("Cancelled")]
    Cancelled,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Stable wire-level kind string for this error
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Invalid { .. } => "invalid",
            Self::NotFound { .. } => "not_found",
            Self::Forbidden { .. } => "forbidden",
            Self::Conflict { .. } => "conflict",
            Self::StaleVersion { .. } => "stale_version",
            Self::IllegalTransition { .. } => "illegal_transition",
            Self::Timeout { .. } => "timeout",
            Self::Transport { .. } => "transport",
            Self::RateLimited => "rate_limited",
            Self::CircuitOpen => "circuit_open",
            Self::Cancelled => "cancelled",
            Self::Config(_)
            | Self::Database(_)
            | Self::Serialization(_)
            | Self::Io(_)
            | Self::Internal { .. } => "internal",
        }
    }

    /// Whether callers can fix this error by changing their request
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::Invalid { .. }
                | Self::NotFound { .. }
                | Self::Forbidden { .. }
                | Self::Conflict { .. }
                | Self::StaleVersion { .. }
                | Self::IllegalTransition { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
