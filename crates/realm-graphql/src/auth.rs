// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authentication endpoint client: login, access-token refresh, revocation.

use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::config::AuthConfig;
use crate::credentials::{Credentials, Provider};
use crate::error::{Error, Result};
use crate::http::build_client;
use crate::user::{User, UserKind};

/// Identity reported for users built from a static admin token.
pub const ADMIN_IDENTITY: &str = "__admin";

/// Provider name used when exchanging a refresh token for an access token.
const REFRESH_PROVIDER: &str = "realm";

/// A short-lived access token scoped to one realm path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    /// `None` only for anonymous users.
    pub token: Option<String>,
    /// Absolute expiry in epoch millis. `None` never expires.
    pub expires_at_ms: Option<u64>,
}

impl AccessToken {
    pub fn never_expiring(token: Option<String>) -> Self {
        Self { token, expires_at_ms: None }
    }

    /// Time left before expiry, or `None` for non-expiring tokens.
    pub fn expires_in(&self, now_ms: u64) -> Option<Duration> {
        self.expires_at_ms.map(|at| Duration::from_millis(at.saturating_sub(now_ms)))
    }
}

/// Source of access tokens for a session.
///
/// [`AuthClient`] is the production implementation; sessions accept any
/// implementation so refresh scheduling can be driven without a server.
pub trait TokenRefresher: Send + Sync {
    fn refresh_access_token<'a>(
        &'a self,
        user: &'a User,
        realm_path: &'a str,
    ) -> BoxFuture<'a, Result<AccessToken>>;
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    #[serde(flatten)]
    credentials: &'a Credentials,
    app_id: &'static str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    data: &'a str,
    path: &'a str,
    provider: &'static str,
    app_id: &'static str,
}

#[derive(Serialize)]
struct RevokeRequest<'a> {
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    refresh_token: RefreshTokenEnvelope,
}

#[derive(Debug, Deserialize)]
struct RefreshTokenEnvelope {
    token: String,
    token_data: RefreshTokenData,
}

#[derive(Debug, Deserialize)]
struct RefreshTokenData {
    identity: String,
    #[serde(default)]
    is_admin: bool,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: AccessTokenEnvelope,
}

#[derive(Debug, Deserialize)]
struct AccessTokenEnvelope {
    token: String,
    token_data: AccessTokenData,
}

#[derive(Debug, Deserialize)]
struct AccessTokenData {
    /// Seconds since the Unix epoch.
    expires: f64,
}

/// Client for the server's `/auth` endpoints.
#[derive(Debug, Clone)]
pub struct AuthClient {
    config: AuthConfig,
    http: reqwest::Client,
}

impl AuthClient {
    /// Create a client with its own timeout-bound HTTP client.
    pub fn new(config: AuthConfig) -> Result<Self> {
        config.validate()?;
        let http = build_client(config.request_timeout())?;
        Ok(Self { config, http })
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    ///
    /// The caller is responsible for setting a request timeout on it.
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Exchange credentials for a [`User`] holding a refresh token.
    ///
    /// Anonymous and admin-token credentials never touch the network.
    pub async fn authenticate(&self, credentials: &Credentials, server: &str) -> Result<User> {
        let server = parse_server_url(server)?;

        match credentials.provider {
            Provider::Anonymous => {
                debug!(server = %server, "anonymous user, skipping authentication");
                return Ok(User::new(self.clone(), None, false, server, UserKind::Anonymous, None));
            }
            Provider::Admin => {
                debug!(server = %server, "admin token user, skipping authentication");
                return Ok(User::new(
                    self.clone(),
                    Some(ADMIN_IDENTITY.to_owned()),
                    true,
                    server,
                    UserKind::AdminToken,
                    credentials.data.clone(),
                ));
            }
            _ => {}
        }

        let body = LoginRequest { credentials, app_id: "" };
        let resp = self.post_json(endpoint(&server, "/auth"), &body, None).await?;
        let resp = Self::ensure_success(resp).await?;
        let login: LoginResponse = serde_json::from_str(&resp.text().await?)?;

        let data = login.refresh_token.token_data;
        info!(
            identity = %data.identity,
            provider = credentials.provider.as_str(),
            "authenticated"
        );
        Ok(User::new(
            self.clone(),
            Some(data.identity),
            data.is_admin,
            server,
            UserKind::Refreshable,
            Some(login.refresh_token.token),
        ))
    }

    /// Exchange the user's refresh token for an access token to `realm_path`.
    pub async fn refresh_access_token(&self, user: &User, realm_path: &str) -> Result<AccessToken> {
        if !user.is_logged_in() {
            return Err(Error::config("user has logged out"));
        }

        match user.kind() {
            UserKind::Anonymous => return Ok(AccessToken::never_expiring(None)),
            UserKind::AdminToken => return Ok(AccessToken::never_expiring(user.token())),
            UserKind::Refreshable => {}
        }

        let refresh_token =
            user.token().ok_or_else(|| Error::config("user has no refresh token"))?;
        let body = RefreshRequest {
            data: &refresh_token,
            path: realm_path,
            provider: REFRESH_PROVIDER,
            app_id: "",
        };
        let resp = self.post_json(endpoint(user.server(), "/auth"), &body, None).await?;
        let resp = Self::ensure_success(resp).await?;
        let parsed: AccessTokenResponse = serde_json::from_str(&resp.text().await?)?;

        let expires_at_ms = (parsed.access_token.token_data.expires * 1000.0) as u64;
        debug!(realm_path, expires_at_ms, "access token refreshed");
        Ok(AccessToken {
            token: Some(parsed.access_token.token),
            expires_at_ms: Some(expires_at_ms),
        })
    }

    /// Revoke the user's refresh token on the server.
    ///
    /// No-op for admin-token, anonymous, and logged-out users.
    pub async fn revoke(&self, user: &User) -> Result<()> {
        if user.kind() != UserKind::Refreshable {
            return Ok(());
        }
        let Some(token) = user.token() else {
            return Ok(());
        };

        let body = RevokeRequest { token: &token };
        let url = endpoint(user.server(), "/auth/revoke");
        let resp = self.post_json(url, &body, Some(&token)).await?;
        Self::ensure_success(resp).await?;
        debug!(identity = user.identity().unwrap_or_default(), "refresh token revoked");
        Ok(())
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &T,
        authorization: Option<&str>,
    ) -> Result<reqwest::Response> {
        let mut req = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(serde_json::to_vec(body)?);
        if let Some(token) = authorization {
            req = req.header(AUTHORIZATION, token);
        }
        Ok(req.send().await?)
    }

    /// The auth endpoints answer 200 on success; anything else is an error.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status() == reqwest::StatusCode::OK {
            return Ok(response);
        }
        Err(status_error(response).await)
    }
}

/// Build an [`Error::Auth`] from a failed response, consuming its body.
pub(crate) async fn status_error(response: reqwest::Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Error::Auth {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or_default().to_owned(),
        body,
    }
}

impl TokenRefresher for AuthClient {
    fn refresh_access_token<'a>(
        &'a self,
        user: &'a User,
        realm_path: &'a str,
    ) -> BoxFuture<'a, Result<AccessToken>> {
        Box::pin(AuthClient::refresh_access_token(self, user, realm_path))
    }
}

/// Parse a server URL, accepting only `http` and `https`.
pub(crate) fn parse_server_url(server: &str) -> Result<Url> {
    let url = Url::parse(server)
        .map_err(|e| Error::config(format!("invalid server URL {server:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::config(format!("server URL must be http or https, got {other:?}"))),
    }
}

/// `scheme://host[:port]` of `server` with the given absolute path.
pub(crate) fn endpoint(server: &Url, path: &str) -> Url {
    let mut url = server.clone();
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.set_path(path);
    url.set_query(None);
    url.set_fragment(None);
    url
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
