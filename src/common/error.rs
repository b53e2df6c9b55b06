//! Error types for minireg

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Registry Errors ===
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Conflict on {service_id}: {reason}")]
    Conflict { service_id: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Field mismatch for {service_id}: {field} (provided {provided})")]
    Mismatch {
        service_id: String,
        field: &'static str,
        provided: String,
    },

    // === Cluster Errors ===
    #[error("Master unavailable: {0}")]
    Unavailable(String),

    #[error("Not master: current master is {0}")]
    NotMaster(String),

    #[error("Peer request to {peer} failed: {reason}")]
    Peer { peer: String, reason: String },

    // === I/O & Config Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::Validation(_) | Error::Mismatch { .. } => StatusCode::BAD_REQUEST,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::NotMaster(_) => StatusCode::FORBIDDEN,
            Error::Unavailable(_) | Error::Peer { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let peer = e
            .url()
            .map(|u| u.origin().ascii_serialization())
            .unwrap_or_else(|| "unknown".to_string());
        Error::Peer {
            peer,
            reason: e.to_string(),
        }
    }
}
