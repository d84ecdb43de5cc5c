// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::auth::{parse_server_url, AuthClient};
use crate::config::AuthConfig;
use crate::credentials::Credentials;
use crate::error::Result;
use crate::persist::PersistedUser;

/// How a user's token behaves. Fixed when the user is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserKind {
    /// No token at all; only usable against servers with auth disabled.
    Anonymous,
    /// Static admin token: never refreshed, never revoked.
    AdminToken,
    /// Long-lived refresh token exchanged for per-path access tokens.
    Refreshable,
}

/// Whether the user still holds a usable token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginState {
    LoggedIn { token: Option<String> },
    LoggedOut,
}

/// An authenticated user of one server.
pub struct User {
    identity: Option<String>,
    is_admin: bool,
    server: Url,
    kind: UserKind,
    state: RwLock<LoginState>,
    client: AuthClient,
}

impl User {
    pub(crate) fn new(
        client: AuthClient,
        identity: Option<String>,
        is_admin: bool,
        server: Url,
        kind: UserKind,
        token: Option<String>,
    ) -> Self {
        Self {
            identity,
            is_admin,
            server,
            kind,
            state: RwLock::new(LoginState::LoggedIn { token }),
            client,
        }
    }

    /// Authenticate against `server` with a default [`AuthClient`].
    pub async fn authenticate(credentials: &Credentials, server: &str) -> Result<Self> {
        let client = AuthClient::new(AuthConfig::default())?;
        client.authenticate(credentials, server).await
    }

    /// Rebuild a user saved with [`User::to_persisted`].
    pub fn restore(client: AuthClient, persisted: PersistedUser) -> Result<Self> {
        let server = parse_server_url(&persisted.server)?;
        Ok(Self::new(
            client,
            persisted.identity,
            persisted.is_admin,
            server,
            persisted.kind,
            persisted.token,
        ))
    }

    /// Snapshot for persistence. `None` once logged out.
    pub fn to_persisted(&self) -> Option<PersistedUser> {
        let token = match &*self.state.read() {
            LoginState::LoggedIn { token } => token.clone(),
            LoginState::LoggedOut => return None,
        };
        Some(PersistedUser {
            identity: self.identity.clone(),
            server: self.server.to_string(),
            is_admin: self.is_admin,
            kind: self.kind,
            token,
        })
    }

    /// Revoke the refresh token and clear it locally.
    ///
    /// Revocation is best effort: failures are logged and the user ends up
    /// logged out regardless.
    pub async fn log_out(&self) {
        if let Err(e) = self.client.revoke(self).await {
            warn!(
                identity = self.identity().unwrap_or_default(),
                err = %e,
                "token revocation failed, logging out locally"
            );
        }
        self.clear_token();
        info!(identity = self.identity().unwrap_or_default(), "logged out");
    }

    pub(crate) fn clear_token(&self) {
        *self.state.write() = LoginState::LoggedOut;
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    pub fn server(&self) -> &Url {
        &self.server
    }

    pub fn kind(&self) -> UserKind {
        self.kind
    }

    pub fn is_anonymous(&self) -> bool {
        self.kind == UserKind::Anonymous
    }

    pub fn is_admin_token(&self) -> bool {
        self.kind == UserKind::AdminToken
    }

    pub fn login_state(&self) -> LoginState {
        self.state.read().clone()
    }

    pub fn is_logged_in(&self) -> bool {
        matches!(*self.state.read(), LoginState::LoggedIn { .. })
    }

    /// The refresh token (or admin token) while logged in.
    pub fn token(&self) -> Option<String> {
        match &*self.state.read() {
            LoginState::LoggedIn { token } => token.clone(),
            LoginState::LoggedOut => None,
        }
    }

    /// The client this user authenticates through.
    pub fn client(&self) -> &AuthClient {
        &self.client
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("identity", &self.identity)
            .field("is_admin", &self.is_admin)
            .field("server", &self.server.as_str())
            .field("kind", &self.kind)
            .field("logged_in", &self.is_logged_in())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "user_tests.rs"]
mod tests;
