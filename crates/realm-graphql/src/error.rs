// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use serde::{Deserialize, Serialize};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced while authenticating, refreshing, or talking to the
/// GraphQL endpoints.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Bad server URL, unsupported scheme, missing identity, logged-out user.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The server answered with a non-success status.
    #[error("authentication failed ({status} {status_text}): {body}")]
    Auth { status: u16, status_text: String, body: String },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Auth { .. } => ErrorKind::Auth,
            Self::Http(_) | Self::WebSocket(_) => ErrorKind::Network,
            Self::Decode(_) | Self::Protocol(_) => ErrorKind::Protocol,
            Self::Io(_) => ErrorKind::Storage,
        }
    }

    /// HTTP status of an [`Error::Auth`], if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Auth { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Fatal errors are never retried by the refresh loop.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Configuration,
    Auth,
    Network,
    Protocol,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "CONFIGURATION",
            Self::Auth => "AUTH",
            Self::Network => "NETWORK",
            Self::Protocol => "PROTOCOL",
            Self::Storage => "STORAGE",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
