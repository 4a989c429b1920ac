use std::path::PathBuf;

use thiserror::Error;

/// Failures that end a single request.
///
/// Timeouts and empty replies are not errors; they come back as labeled
/// results.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("'{binary}' was not found on PATH; install it or point --gemini-bin at it")]
    BinaryNotFound { binary: String },

    #[error("failed to spawn '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("working directory {} does not exist", path.display())]
    WorkingDirectory { path: PathBuf },

    #[error("tmux: {0:#}")]
    Transport(#[from] anyhow::Error),
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
