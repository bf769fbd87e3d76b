//! Error types for ptz-scout.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoutError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Task join: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Config: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("no endpoint accepted the request ({attempted} tried)")]
    EndpointsExhausted { attempted: usize },

    #[error("device: {0}")]
    Device(String),

    #[error("OCR: {0}")]
    Ocr(String),

    #[error("Protocol: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, ScoutError>;
