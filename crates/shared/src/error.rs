//! Error types for Deskline collaborator transports

use thiserror::Error;

/// Failure modes of the REST and stream collaborators
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("timeout waiting for response")]
    Timeout,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("rejected by server: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Returns true if this error is transient and should be retried
    ///
    /// Authorization failures are terminal: retrying cannot succeed without
    /// new credentials. Malformed payloads and explicit rejections are
    /// permanent for the request that produced them.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Network(_) => true,
            TransportError::Timeout => true,
            TransportError::Unauthorized(_) => false,
            TransportError::Malformed(_) => false,
            TransportError::Rejected(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::Network("reset".into()).is_transient());
        assert!(TransportError::Timeout.is_transient());
        assert!(!TransportError::Unauthorized("expired".into()).is_transient());
        assert!(!TransportError::Malformed("bad json".into()).is_transient());
        assert!(!TransportError::Rejected("banned word".into()).is_transient());
    }
}
