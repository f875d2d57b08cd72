//! Server error types.

use quorum_core::StorageError;
use thiserror::Error;

/// Errors that can occur in the server runtime.
///
/// Protocol errors caused by a peer (bad frames, failed decryption) are not
/// server errors: the driver answers them with a `signal-error` frame.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration error (unusable database path, etc.).
    ///
    /// Fatal: fix configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport error (peer unreachable, channel closed).
    ///
    /// May be transient; other peers are unaffected.
    #[error("transport error: {0}")]
    Transport(String),

    /// Startup or maintenance failed inside the protocol core.
    #[error("core error: {0}")]
    Core(#[from] quorum_core::Error),

    /// Durable storage could not be opened.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ServerError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Core(error) => error.kind().is_transient(),
            Self::Storage(error) => error.is_transient(),
            Self::Config(_) => false,
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
