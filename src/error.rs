use crate::connectors::ServiceKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArrboardError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{service} request failed: {message}")]
    Upstream {
        service: ServiceKind,
        message: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed upstream data: {0}")]
    MalformedUpstream(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} is not configured")]
    NotConfigured(ServiceKind),

    #[error("Notification failed: {0}")]
    Notification(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl ArrboardError {
    pub fn upstream(service: ServiceKind, message: impl Into<String>) -> Self {
        ArrboardError::Upstream {
            service,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ArrboardError>;
