use thiserror::Error;

/// Errors surfaced to callers of the session layer.
///
/// Transport failures are deliberately absent from most public signatures:
/// they are reported through `connection_change(false)` instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid websocket url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unsupported url scheme `{0}`, expected ws")]
    UnsupportedScheme(String),

    #[error("envelope codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("websocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
