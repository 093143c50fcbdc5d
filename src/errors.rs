use std::{error::Error, fmt};

use http::StatusCode;
use thiserror::Error;

/// An error a handler may raise to short-circuit straight to an error response.
///
/// Any `Box<dyn Error + Send + Sync>` converts into a [`HandlerError`] with a `500 Internal
/// Server Error` status and the error's `Display` as the message, so handlers that already
/// return `Result<_, Box<dyn Error + Send + Sync>>` don't need to change their error type to
/// pick a specific status code — they opt in with `HandlerError::with_status` only when they
/// care.
#[derive(Error, Debug)]
#[error("{status}: {message:?}")]
pub struct HandlerError {
    pub status: StatusCode,
    pub message: Option<String>,
}

impl HandlerError {
    pub fn with_status(status: StatusCode) -> Self {
        Self {
            status,
            message: None,
        }
    }

    pub fn message(mut self, message: impl fmt::Display) -> Self {
        self.message = Some(message.to_string());
        self
    }
}

impl<E: Error + Send + Sync + 'static> From<Box<E>> for HandlerError {
    fn from(err: Box<E>) -> Self {
        HandlerError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: Some(err.to_string()),
        }
    }
}

impl From<Box<dyn Error + Send + Sync>> for HandlerError {
    fn from(err: Box<dyn Error + Send + Sync>) -> Self {
        HandlerError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: Some(err.to_string()),
        }
    }
}
