use thiserror::Error;

use crate::record::Status;

/// Errors raised by the valuation service.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("cannot move a record from {from} to {to}")]
    InvalidTransition { from: Status, to: Status },

    #[error("{0}")]
    Forbidden(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("export failed: {0}")]
    Export(String),

    #[error("chart rendering failed: {0}")]
    Chart(String),
}

pub type Result<T> = std::result::Result<T, Error>;

const FALLBACK_MESSAGE: &str = "Something went wrong. Please try again.";

impl Error {
    /// Message suitable for a toast notification.
    ///
    /// Internal failures (disk, serialization, configuration) are reduced to a
    /// generic fallback; everything the user can act on keeps its message.
    pub fn user_message(&self) -> String {
        match self {
            Error::Io(_) | Error::Json(_) | Error::Config(_) | Error::Csv(_) => {
                FALLBACK_MESSAGE.to_string()
            }
            other => {
                let message = other.to_string();
                if message.trim().is_empty() {
                    FALLBACK_MESSAGE.to_string()
                } else {
                    message
                }
            }
        }
    }
}

#[cfg(feature = "web")]
mod web {
    use super::Error;
    use axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    };
    use plotters::drawing::DrawingAreaErrorKind;
    use serde::Serialize;

    #[derive(Serialize)]
    struct ErrorBody {
        status: &'static str,
        message: String,
    }

    impl IntoResponse for Error {
        fn into_response(self) -> Response {
            let code = match &self {
                Error::NotFound(_) => StatusCode::NOT_FOUND,
                Error::Validation(_) | Error::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
                Error::Forbidden(_) => StatusCode::FORBIDDEN,
                Error::Unauthorized => StatusCode::UNAUTHORIZED,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            if code == StatusCode::INTERNAL_SERVER_ERROR {
                log::error!("request failed: {}", self);
            }

            let body = ErrorBody {
                status: "error",
                message: self.user_message(),
            };
            (code, Json(body)).into_response()
        }
    }

    impl From<DrawingAreaErrorKind<std::io::Error>> for Error {
        fn from(err: DrawingAreaErrorKind<std::io::Error>) -> Self {
            Error::Chart(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_fall_back_to_generic_message() {
        let err = Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert_eq!(err.user_message(), FALLBACK_MESSAGE);
    }

    #[test]
    fn actionable_errors_keep_their_message() {
        let err = Error::Validation("client name is required".to_string());
        assert_eq!(err.user_message(), "client name is required");

        let err = Error::InvalidTransition {
            from: Status::Approved,
            to: Status::OnProgress,
        };
        assert_eq!(
            err.user_message(),
            "cannot move a record from approved to on-progress"
        );
    }

    #[test]
    fn empty_messages_fall_back() {
        let err = Error::Forbidden(String::new());
        assert_eq!(err.user_message(), FALLBACK_MESSAGE);
    }
}
