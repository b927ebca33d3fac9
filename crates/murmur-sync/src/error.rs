use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Rate limit reached, try again shortly")]
    RateLimited,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Message not found: {0}")]
    NotFound(String),

    #[error("Message {0} is not synced yet")]
    NotSynced(String),

    /// Transient: the persistence call was rejected or never completed.
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Room {0} is closed")]
    RoomClosed(String),

    #[error("Gateway channel closed")]
    ChannelClosed,

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl SyncError {
    /// Failures the user can fix by retrying later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Backend(_) | Self::Http(_) | Self::WebSocket(_) | Self::ChannelClosed | Self::RateLimited
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
