// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes shared across the REST surface and the terminal WebSocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Terminal access is disabled for this deployment.
    Unavailable,
    BadRequest,
    SpawnFailed,
    /// The host process is gone.
    Exited,
    /// The host process did not answer within its response window.
    Timeout,
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unavailable => 503,
            Self::BadRequest => 400,
            Self::SpawnFailed => 500,
            Self::Exited => 410,
            Self::Timeout => 504,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unavailable => "UNAVAILABLE",
            Self::BadRequest => "BAD_REQUEST",
            Self::SpawnFailed => "SPAWN_FAILED",
            Self::Exited => "EXITED",
            Self::Timeout => "TIMEOUT",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for ErrorCode {}

/// Wrap `code` with a human-readable message. The code stays recoverable
/// through [`code_of`].
pub fn coded(code: ErrorCode, message: impl fmt::Display + Send + Sync + 'static) -> anyhow::Error {
    anyhow::Error::new(code).context(message)
}

/// The [`ErrorCode`] carried anywhere in `err`'s chain, or `Internal`.
pub fn code_of(err: &anyhow::Error) -> ErrorCode {
    err.downcast_ref::<ErrorCode>().copied().unwrap_or(ErrorCode::Internal)
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
