use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to resolve coordinates for {location}: {reason}")]
    Resolution { location: String, reason: String },

    #[error("Weather fetch error: {0}")]
    Fetch(String),

    #[error("Malformed data: {0}")]
    MalformedData(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Alert dispatch error: {0}")]
    Dispatch(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
