use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("browser automation failed: {0}")]
    Browser(#[from] chromiumoxide::error::CdpError),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("session pool error: {0}")]
    Session(String),
}

impl ScraperError {
    /// A fatal session error means the browser process behind the current
    /// session can no longer be trusted; the caller discards the session and
    /// retries once on a fresh one. Timeouts are transient and keep the
    /// session.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, ScraperError::Browser(_))
    }
}

pub type Result<T> = std::result::Result<T, ScraperError>;
