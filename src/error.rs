use thiserror::Error;

/// Errors that can occur while talking to the document backend or
/// mutating portal state
#[derive(Error, Debug)]
pub enum PortalError {
    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Session expired or not authenticated")]
    Unauthorized,

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Backend returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid backend response: {message}")]
    InvalidResponse { message: String },

    #[error("{message}")]
    Validation { message: String },

    #[error("Operation already in progress for {key}")]
    Busy { key: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session store error: {message}")]
    Storage { message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PortalError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        PortalError::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_response(message: impl Into<String>) -> Self {
        PortalError::InvalidResponse {
            message: message.into(),
        }
    }

    /// Text suitable for a transient user-facing notification
    pub fn user_message(&self) -> String {
        match self {
            PortalError::Network(_) => "Could not reach the server. Please try again.".to_string(),
            PortalError::Unauthorized => "Your session has expired. Please log in again.".to_string(),
            PortalError::Api { message, .. } if !message.is_empty() => message.clone(),
            PortalError::Api { status, .. } => format!("Request failed with status {}", status),
            other => other.to_string(),
        }
    }
}

/// Result type alias for portal operations
pub type Result<T> = std::result::Result<T, PortalError>;
