use thiserror::Error;

use crate::core::session::UserId;
use crate::core::ui::MessageId;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("UI error: {0}")]
    Ui(#[from] UiError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Budget exceeded: spent {spent:.4} of {limit:.4}")]
    BudgetExceeded { spent: f64, limit: f64 },

    #[error("Cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Reading the response body failed after the stream was opened.
    #[error("Stream read error: {0}")]
    Stream(String),

    #[error("Missing API key: {0}")]
    MissingApiKey(String),
}

#[derive(Error, Debug, Clone)]
pub enum UiError {
    #[error("Send failed: {0}")]
    Send(String),

    #[error("Edit of message {message_id} failed: {reason}")]
    Edit { message_id: MessageId, reason: String },

    #[error("Image upload failed: {0}")]
    Image(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file error: {0}")]
    File(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("A reply for user {0} is still streaming")]
    Busy(UserId),

    #[error("Session not found: {0}")]
    NotFound(UserId),
}
