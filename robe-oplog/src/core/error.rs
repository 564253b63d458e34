use thiserror::Error;

/// Main error type for oplog watching
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("No primary found: {0}")]
    NoPrimaryFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Cursor connection error: {0}")]
    CursorConnection(String),

    #[error("Subscriber callback failed on {topic}: {message}")]
    SubscriberCallback { topic: String, message: String },

    #[error("Invalid topic pattern: {0}")]
    InvalidTopic(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatchError {
    /// Whether this error means the connection or cursor was lost, as
    /// opposed to a fault in the watcher or a subscriber
    pub fn is_stream_error(&self) -> bool {
        matches!(self, Self::CursorConnection(_) | Self::ConnectionFailed(_))
    }
}

impl From<serde_json::Error> for WatchError {
    fn from(e: serde_json::Error) -> Self {
        WatchError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for WatchError {
    fn from(e: serde_yaml::Error) -> Self {
        WatchError::Serialization(e.to_string())
    }
}

/// Result type alias for oplog watching
pub type WatchResult<T> = std::result::Result<T, WatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_error_classification() {
        assert!(WatchError::CursorConnection("reset".into()).is_stream_error());
        assert!(WatchError::ConnectionFailed("refused".into()).is_stream_error());
        assert!(!WatchError::NoPrimaryFound("empty topology".into()).is_stream_error());
        assert!(!WatchError::InvalidTopic("orders".into()).is_stream_error());
    }

    #[test]
    fn test_error_display() {
        let err = WatchError::SubscriberCallback {
            topic: "orders:insert".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Subscriber callback failed on orders:insert: boom"
        );
    }
}
