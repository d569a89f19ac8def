use std::path::PathBuf;

/// Core error type for the bot.
///
/// Adapter crates map their specific errors into this type so the session
/// manager can tell fatal failures (storage, exhausted reconnects) from the
/// transient ones it recovers from.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid credential encoding: {0}")]
    InvalidCredentialEncoding(String),

    #[error("credential storage unavailable: {path}: {source}")]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("session is not connected")]
    NotConnected,

    #[error("model error: {0}")]
    Ai(String),

    #[error("gave up reconnecting after {attempts} consecutive failed attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Storage failures halt startup; nothing inside the core retries them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::StorageUnavailable { .. }
                | Error::InvalidCredentialEncoding(_)
                | Error::ReconnectExhausted { .. }
                | Error::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
