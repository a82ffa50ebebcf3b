/// Errors raised by the persistence gateway.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The referenced project (or record) does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A uniqueness rule was violated, e.g. a duplicate project name.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The caller supplied something the store refuses to persist.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Other store-specific error.
    #[error("Store error: {0}")]
    Other(String),
}

impl StoreError {
    /// Returns true if this error is transient and the operation may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// Returns true if the error means the target does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Errors produced while verifying a credential.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum AuthError {
    /// No credential was supplied at all.
    #[error("Missing credential")]
    MissingCredential,

    /// The credential is unknown, expired or malformed.
    #[error("Invalid credential")]
    InvalidCredential,
}

/// Errors returned by an AI collaborator.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GenerationError {
    /// The provider asked us to slow down.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The account behind the provider ran out of quota.
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The provider did not answer in time.
    #[error("Generation timed out")]
    Timeout,

    /// Network or HTTP level failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The provider answered with something we could not use.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl GenerationError {
    /// Returns true if the provider is temporarily unavailable and a later retry may work.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GenerationError::RateLimited(_)
                | GenerationError::QuotaExceeded(_)
                | GenerationError::Timeout
        )
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GenerationError::Timeout
        } else {
            GenerationError::Transport(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_transient() {
        let timeout = StoreError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow"));
        assert!(timeout.is_transient());

        let denied = StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "nope",
        ));
        assert!(!denied.is_transient());
        assert!(!StoreError::NotFound("p".to_string()).is_transient());
        assert!(StoreError::NotFound("p".to_string()).is_not_found());
    }

    #[test]
    fn test_generation_error_transient() {
        assert!(GenerationError::RateLimited("slow down".to_string()).is_transient());
        assert!(GenerationError::QuotaExceeded("billing".to_string()).is_transient());
        assert!(GenerationError::Timeout.is_transient());
        assert!(!GenerationError::Transport("reset".to_string()).is_transient());
        assert!(!GenerationError::InvalidResponse("empty".to_string()).is_transient());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(AuthError::MissingCredential.to_string(), "Missing credential");
        assert_eq!(
            StoreError::Conflict("name taken".to_string()).to_string(),
            "Conflict: name taken"
        );
    }
}
