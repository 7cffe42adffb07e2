//! Error types for the Polymarket adapter.

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("api returned status {status}: {body}")]
    Api { status: StatusCode, body: String },

    #[error("invalid pagination cursor: {0}")]
    Cursor(#[from] base64::DecodeError),

    #[error("unknown event type: {0}")]
    UnknownEvent(String),

    #[error(transparent)]
    Side(#[from] engine::InvalidSide),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("cancelled")]
    Cancelled,

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("store error: {0}")]
    Store(#[from] store::StoreError),
}

impl Error {
    /// Protocol errors are logged and the offending message skipped; they
    /// never tear down the connection.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Error::Json(_) | Error::UnknownEvent(_) | Error::Side(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
