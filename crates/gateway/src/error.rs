// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error taxonomy for gateway operations.
///
/// Connection-class kinds (`Unavailable`, `Timeout`) trigger one automatic
/// recovery attempt at the client boundary; everything else surfaces as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// No usable session to the device.
    Unavailable,
    /// Command exceeded its deadline; session preserved.
    Timeout,
    /// Reply could not be parsed; session preserved.
    Framing,
    /// Named entity (zone/source/station) absent.
    NotFound,
    /// Local validation failure; no wire traffic was generated.
    InvalidArgument,
    /// Reconnect already in progress, or the command mutex was held past
    /// its wait budget.
    Conflict,
}

impl ErrorKind {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unavailable => 503,
            Self::Timeout => 504,
            Self::Framing => 500,
            Self::NotFound => 404,
            Self::InvalidArgument => 422,
            Self::Conflict => 409,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unavailable => "UNAVAILABLE",
            Self::Timeout => "TIMEOUT",
            Self::Framing => "FRAMING",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::Conflict => "CONFLICT",
        }
    }
}

/// An error kind plus human-readable context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub message: String,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn framing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Framing, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Whether this error indicates a dead or unusable connection, which
    /// client-level retry policies are allowed to recover from.
    pub fn is_connection_class(&self) -> bool {
        matches!(self.kind, ErrorKind::Unavailable | ErrorKind::Timeout)
    }

    /// Prefix additional context onto the message, preserving the kind.
    pub fn context(self, prefix: impl fmt::Display) -> Self {
        Self { kind: self.kind, message: format!("{prefix}: {}", self.message) }
    }

    pub fn to_http_response(&self) -> (StatusCode, Json<ErrorResponse>) {
        let status = StatusCode::from_u16(self.kind.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse {
            error: ErrorBody { code: self.kind.as_str().to_owned(), message: self.message.clone() },
        };
        (status, Json(body))
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for GatewayError {}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        GatewayError::unavailable(e.to_string())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
