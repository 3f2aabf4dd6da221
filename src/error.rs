use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Channel {0} does not map to a GPIO pin")]
    UnmappedChannel(u32),
    #[error("Channel {0} has not been exported")]
    NotExported(u32),
    #[error("Cannot set invalid direction: {0}")]
    InvalidDirection(String),
    #[error("Cannot set invalid edge: {0}")]
    InvalidEdge(String),
    #[error("Cannot set invalid mode: {0}")]
    InvalidMode(String),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("Could not read a hardware revision from board info")]
    RevisionUnreadable,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("I/O error during {op} on {pin}: {source}")]
    Io {
        op: &'static str,
        pin: String,
        #[source]
        source: std::io::Error,
    },
}

impl AppError {
    pub(crate) fn io(op: &'static str, pin: impl Into<String>, source: std::io::Error) -> Self {
        AppError::Io {
            op,
            pin: pin.into(),
            source,
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::UnmappedChannel(_) => StatusCode::NOT_FOUND,
            AppError::NotExported(_)
            | AppError::InvalidDirection(_)
            | AppError::InvalidEdge(_)
            | AppError::InvalidMode(_)
            | AppError::InvalidValue(_) => StatusCode::BAD_REQUEST,
            AppError::RevisionUnreadable | AppError::Config(_) | AppError::Io { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}
