//! Request layer error values

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Failure category of an API call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    /// No response was received (offline, DNS, refused connection, timeout)
    NetworkFailure,
    /// Non-2xx status
    HttpError,
    /// Body was not JSON or did not match the expected shape
    ShapeMismatch,
}

/// Uniform error value produced by the request layer
///
/// Returned inside [`ApiResponse`], never propagated as an `Err` past the
/// request layer.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("{message}")]
pub struct ApiError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub kind: ApiErrorKind,
}

impl ApiError {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            details: None,
            kind: ApiErrorKind::NetworkFailure,
        }
    }

    pub fn http(status: u16, message: impl Into<String>, details: Option<Value>) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
            details,
            kind: ApiErrorKind::HttpError,
        }
    }

    pub fn shape(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            details: None,
            kind: ApiErrorKind::ShapeMismatch,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

/// `{data, error}` pair returned by every request helper
///
/// `data` carries the degraded value (`None` or an empty list) whenever
/// `error` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub data: T,
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { data, error: None }
    }

    pub fn failed(data: T, error: ApiError) -> Self {
        Self {
            data,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiResponse<U> {
        ApiResponse {
            data: f(self.data),
            error: self.error,
        }
    }

    /// Collapse into a `Result`, discarding degraded data on failure.
    pub fn into_result(self) -> Result<T, ApiError> {
        match self.error {
            None => Ok(self.data),
            Some(error) => Err(error),
        }
    }
}
