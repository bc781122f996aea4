use thiserror::Error;

/// Coarse classification of a failed call to the provisioning API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request never got an answer (connection refused, DNS, reset).
    Transport,
    /// The server answered with a non-success status.
    Api,
    /// The server answered but the body was not what the endpoint promises.
    Decode,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("{message}")]
    Transport { message: String },

    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("{message}")]
    Decode { message: String },
}

impl ApiError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api { status, message: message.into() }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode { message: message.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Transport { .. } => ErrorKind::Transport,
            ApiError::Api { .. } => ErrorKind::Api,
            ApiError::Decode { .. } => ErrorKind::Decode,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::Transport { message }
            | ApiError::Api { message, .. }
            | ApiError::Decode { message } => message,
        }
    }

    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}

/// Who gets to see a failure. Attached by the caller, never by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Background refreshes: logged and reflected in health only.
    Silent,
    /// Explicit user actions: forwarded to the presentation layer.
    Surfaced,
}

#[derive(Error, Debug)]
pub enum PanelError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type PanelResult<T> = Result<T, PanelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_is_display() {
        let err = ApiError::api(404, "not found");
        assert_eq!(err.to_string(), "not found");
        assert_eq!(err.message(), "not found");
        assert_eq!(err.kind(), ErrorKind::Api);
        assert!(!err.is_transport());
    }

    #[test]
    fn test_transport_classification() {
        let err = ApiError::transport("connection refused");
        assert!(err.is_transport());

        let wrapped: PanelError = err.into();
        assert!(wrapped.to_string().contains("connection refused"));
    }
}
