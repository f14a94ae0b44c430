use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Remote profile error: {0}")]
    Remote(String),
    #[error("Remote profile request timed out: {0}")]
    Timeout(String),
    #[error("No matched user for '{0}'")]
    NotFound(String),
    #[error("Profile unavailable for '{0}': no cached snapshot and refresh failed")]
    Unavailable(String),
    #[error("Background task failed: {0}")]
    Task(String),
}

impl InfraError {
    /// Failures worth another attempt within the same fetch.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Remote(message) => {
                let message = message.to_ascii_lowercase();
                message.contains("network error")
                    || message.contains("http 5")
                    || message.contains("connection reset")
                    || message.contains("temporarily unavailable")
            }
            _ => false,
        }
    }
}
