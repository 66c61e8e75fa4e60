use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("HTTP request failed: {0}")]
    FetchError(#[from] reqwest::Error),

    #[error("News API error ({code}): {message}")]
    NewsApiError { code: String, message: String },

    #[error("AI API error: {status} - {body}")]
    AiApiError { status: u16, body: String },

    #[error("Model output malformed: {0}")]
    ModelOutputMalformed(String),

    #[error("Database error: {0}")]
    DbError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::DbError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
