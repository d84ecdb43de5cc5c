// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use crate::error::{Error, Result};

/// Default timeout for each request to the authentication endpoint.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Default margin before expiry at which an access token is refreshed.
pub const DEFAULT_REFRESH_MARGIN_MS: u64 = 10_000;

/// Default delay before retrying a failed refresh.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 3_000;

/// Tunables for authentication and access-token refresh.
///
/// Embeds into a host binary's CLI via `#[command(flatten)]`; every flag
/// also reads from a `REALM_GRAPHQL_*` env var.
#[derive(Debug, Clone, clap::Args)]
pub struct AuthConfig {
    /// Timeout for each request to the authentication endpoint, in milliseconds.
    #[arg(
        long,
        default_value_t = DEFAULT_REQUEST_TIMEOUT_MS,
        env = "REALM_GRAPHQL_REQUEST_TIMEOUT_MS"
    )]
    pub request_timeout_ms: u64,

    /// Refresh access tokens this many milliseconds before they expire.
    #[arg(
        long,
        default_value_t = DEFAULT_REFRESH_MARGIN_MS,
        env = "REALM_GRAPHQL_REFRESH_MARGIN_MS"
    )]
    pub refresh_margin_ms: u64,

    /// Delay before retrying a failed refresh, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_RETRY_DELAY_MS, env = "REALM_GRAPHQL_RETRY_DELAY_MS")]
    pub retry_delay_ms: u64,

    /// Stop retrying after this many consecutive failed refreshes. Unbounded when unset.
    #[arg(long, env = "REALM_GRAPHQL_MAX_REFRESH_RETRIES")]
    pub max_refresh_retries: Option<u32>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            refresh_margin_ms: DEFAULT_REFRESH_MARGIN_MS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            max_refresh_retries: None,
        }
    }
}

impl AuthConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn refresh_margin(&self) -> Duration {
        Duration::from_millis(self.refresh_margin_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(Error::config("request timeout must be greater than zero"));
        }
        if self.retry_delay_ms == 0 {
            return Err(Error::config("retry delay must be greater than zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
