use coderoom_core::wire::JoinFailure;

/// Errors that can occur in sandbox operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SandboxError {
    /// Path does not exist.
    #[error("Path not found: {0}")]
    NotFound(String),

    /// The parent directory of a path has not been created yet.
    #[error("Parent directory missing for: {0}")]
    ParentMissing(String),

    /// A path exists but has the wrong kind (file vs directory).
    #[error("Path has the wrong type: {0}")]
    WrongKind(String),

    /// Path traversal attempt detected.
    #[error("Path traversal attempt detected: {0}")]
    PathTraversal(String),

    /// A process could not be started.
    #[error("Failed to spawn '{program}'")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The build step exited unsuccessfully.
    #[error("Command '{program}' exited with status {code:?}")]
    CommandFailed { program: String, code: Option<i32> },

    /// Could not reach or talk to the coderoom server.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server sent something we did not expect.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server refused to let us join.
    #[error("Join rejected: {0}")]
    JoinRejected(JoinFailure),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Injected or backend-specific failure.
    #[error("Sandbox error: {0}")]
    Other(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for SandboxError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SandboxError::Connection(e.to_string())
    }
}
