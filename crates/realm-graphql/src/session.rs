// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-path GraphQL session: endpoint resolution and the access-token refresh task.
//!
//! A [`SessionConfig`] binds one user to one realm path. It fetches an access
//! token on creation and keeps it fresh by scheduling a refresh shortly before
//! expiry. Every scheduled refresh bumps a generation counter; a continuation
//! that wakes up to a newer generation exits without doing anything, so at most
//! one refresh is ever pending. The task stops when the user logs out or the
//! session is disposed (dropping the session disposes it).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::auth::{endpoint, AccessToken, TokenRefresher};
use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::http::epoch_ms;
use crate::user::User;

/// Path marker replaced by the user's identity.
const ROOT_PLACEHOLDER: &str = "/~/";

/// Callback for failed background refreshes. Returning `true` marks the
/// error fatal and suppresses the retry.
pub type AuthErrorHandler = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Options for [`SessionConfig::create`].
#[derive(Clone, Default)]
pub struct SessionOptions {
    realm_path: String,
    on_auth_error: Option<AuthErrorHandler>,
    query_based_sync: bool,
}

impl SessionOptions {
    /// `realm_path` may contain `/~/`, which expands to the user's identity.
    pub fn new(realm_path: impl Into<String>) -> Self {
        Self { realm_path: realm_path.into(), on_auth_error: None, query_based_sync: false }
    }

    #[must_use]
    pub fn with_auth_error_handler(
        mut self,
        handler: impl Fn(&Error) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.on_auth_error = Some(Arc::new(handler));
        self
    }

    /// Target the user's query-based (partial) sync subscription realm.
    #[must_use]
    pub fn with_query_based_sync(mut self, enabled: bool) -> Self {
        self.query_based_sync = enabled;
        self
    }
}

/// Handle to the session's current access token.
///
/// Cheap to clone; every clone observes refreshes.
#[derive(Debug, Clone, Default)]
pub struct AuthHeaders {
    token: Arc<RwLock<Option<String>>>,
}

impl AuthHeaders {
    pub fn current_token(&self) -> Option<String> {
        self.token.read().clone()
    }

    fn set(&self, token: Option<String>) {
        *self.token.write() = token;
    }

    /// Set `authorization: <token>`. Leaves `headers` untouched without a token.
    pub fn apply(&self, headers: &mut HeaderMap) {
        let Some(token) = self.current_token() else {
            return;
        };
        match HeaderValue::from_str(&token) {
            Ok(value) => {
                headers.insert(AUTHORIZATION, value);
            }
            Err(e) => warn!(err = %e, "access token is not a valid header value"),
        }
    }

    pub fn apply_to(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut headers = HeaderMap::new();
        self.apply(&mut headers);
        req.headers(headers)
    }

    /// Payload for a subscription handshake: `{"token": ...}` or `{}`.
    pub fn connection_params(&self) -> Value {
        match self.current_token() {
            Some(token) => json!({ "token": token }),
            None => json!({}),
        }
    }
}

/// State shared between a session, its links, and its refresh continuations.
pub(crate) struct SessionState {
    user: Arc<User>,
    realm_path: String,
    refresher: Arc<dyn TokenRefresher>,
    headers: AuthHeaders,
    on_auth_error: Option<AuthErrorHandler>,
    generation: AtomicU64,
    failures: AtomicU32,
    cancel: CancellationToken,
    runtime: Handle,
    refresh_margin: Duration,
    retry_delay: Duration,
    max_retries: Option<u32>,
}

impl SessionState {
    pub(crate) fn headers(&self) -> &AuthHeaders {
        &self.headers
    }

    pub(crate) fn realm_path(&self) -> &str {
        &self.realm_path
    }

    /// Schedule one refresh after `after`.
    ///
    /// A retrying refresh supersedes any pending one. A non-retrying refresh
    /// runs alongside the pending timer, so its failure leaves the natural
    /// schedule intact.
    pub(crate) fn schedule(self: &Arc<Self>, after: Duration, should_retry: bool) {
        if self.cancel.is_cancelled() {
            return;
        }
        let generation =
            should_retry.then(|| self.generation.fetch_add(1, Ordering::AcqRel) + 1);
        debug!(
            realm_path = %self.realm_path,
            delay_ms = after.as_millis() as u64,
            ?generation,
            should_retry,
            "token refresh scheduled"
        );

        let state = Arc::clone(self);
        self.runtime.spawn(async move {
            tokio::select! {
                _ = state.cancel.cancelled() => return,
                _ = tokio::time::sleep(after) => {}
            }
            if let Some(generation) = generation {
                if state.generation.load(Ordering::Acquire) != generation {
                    debug!(
                        realm_path = %state.realm_path,
                        generation,
                        "superseded refresh skipped"
                    );
                    return;
                }
            }
            state.refresh(should_retry).await;
        });
    }

    async fn refresh(self: &Arc<Self>, should_retry: bool) {
        if !self.user.is_logged_in() {
            info!(realm_path = %self.realm_path, "user logged out, stopping token refresh");
            return;
        }
        match self.refresher.refresh_access_token(&self.user, &self.realm_path).await {
            Ok(token) => {
                self.failures.store(0, Ordering::Relaxed);
                self.apply_token(token);
            }
            Err(e) => self.handle_failure(e, should_retry),
        }
    }

    fn apply_token(self: &Arc<Self>, token: AccessToken) {
        self.headers.set(token.token);
        match token.expires_at_ms {
            Some(expires_at_ms) => {
                let delay = refresh_delay(expires_at_ms, epoch_ms(), self.refresh_margin);
                self.schedule(delay, true);
            }
            None => debug!(realm_path = %self.realm_path, "access token does not expire"),
        }
    }

    fn handle_failure(self: &Arc<Self>, err: Error, should_retry: bool) {
        let fatal = match &self.on_auth_error {
            Some(handler) => handler(&err),
            None => false,
        };

        if fatal || err.is_fatal() {
            error!(realm_path = %self.realm_path, err = %err, "token refresh failed, not retrying");
            return;
        }
        if !should_retry {
            warn!(realm_path = %self.realm_path, err = %err, "token refresh failed");
            return;
        }

        // Only failures of the retrying loop count toward the bound.
        let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(max) = self.max_retries {
            if failures >= max {
                error!(
                    realm_path = %self.realm_path,
                    failures,
                    err = %err,
                    "token refresh failed {failures} times in a row, giving up"
                );
                return;
            }
        }

        warn!(
            realm_path = %self.realm_path,
            attempt = failures,
            err = %err,
            "token refresh failed, retrying in {:?}",
            self.retry_delay
        );
        self.schedule(self.retry_delay, true);
    }
}

/// Endpoints and live credentials for one user's realm path.
pub struct SessionConfig {
    http_endpoint: Url,
    websocket_endpoint: Url,
    state: Arc<SessionState>,
}

impl SessionConfig {
    /// Resolve endpoints and fetch the first access token through the
    /// user's own [`AuthClient`](crate::AuthClient).
    pub async fn create(user: Arc<User>, options: SessionOptions) -> Result<Self> {
        let client = user.client().clone();
        let config = client.config().clone();
        Self::create_with_refresher(user, options, Arc::new(client), &config).await
    }

    /// Like [`SessionConfig::create`] with an explicit token source.
    pub async fn create_with_refresher(
        user: Arc<User>,
        options: SessionOptions,
        refresher: Arc<dyn TokenRefresher>,
        config: &AuthConfig,
    ) -> Result<Self> {
        let realm_path =
            resolve_realm_path(&options.realm_path, user.identity(), options.query_based_sync)?;
        let (http_endpoint, websocket_endpoint) = graphql_endpoints(user.server(), &realm_path)?;
        let runtime =
            Handle::try_current().map_err(|e| Error::config(format!("no Tokio runtime: {e}")))?;

        let token = refresher.refresh_access_token(&user, &realm_path).await?;

        let state = Arc::new(SessionState {
            user,
            realm_path,
            refresher,
            headers: AuthHeaders::default(),
            on_auth_error: options.on_auth_error,
            generation: AtomicU64::new(0),
            failures: AtomicU32::new(0),
            cancel: CancellationToken::new(),
            runtime,
            refresh_margin: config.refresh_margin(),
            retry_delay: config.retry_delay(),
            max_retries: config.max_refresh_retries,
        });
        info!(
            realm_path = %state.realm_path,
            endpoint = %http_endpoint,
            "graphql session created"
        );
        state.apply_token(token);

        Ok(Self { http_endpoint, websocket_endpoint, state })
    }

    pub fn http_endpoint(&self) -> &Url {
        &self.http_endpoint
    }

    pub fn websocket_endpoint(&self) -> &Url {
        &self.websocket_endpoint
    }

    /// Realm path after placeholder expansion.
    pub fn realm_path(&self) -> &str {
        &self.state.realm_path
    }

    pub fn user(&self) -> &Arc<User> {
        &self.state.user
    }

    pub fn current_token(&self) -> Option<String> {
        self.state.headers.current_token()
    }

    /// Handle for decorating requests with the current token.
    pub fn auth_headers(&self) -> AuthHeaders {
        self.state.headers.clone()
    }

    pub fn connection_params(&self) -> Value {
        self.state.headers.connection_params()
    }

    /// Force a refresh after `after_delay`, e.g. on a 401 from a query.
    ///
    /// With `should_retry` the forced refresh replaces any pending scheduled
    /// one. With `should_retry` false it runs alongside the pending timer and a
    /// failure is reported but neither retried nor counted toward
    /// `max_refresh_retries`.
    pub fn refresh_token(&self, after_delay: Duration, should_retry: bool) {
        self.state.schedule(after_delay, should_retry);
    }

    /// Stop the refresh task. Called automatically on drop.
    pub fn dispose(&self) {
        if !self.state.cancel.is_cancelled() {
            debug!(realm_path = %self.state.realm_path, "graphql session disposed");
            self.state.cancel.cancel();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.state.cancel.is_cancelled()
    }

    pub(crate) fn state(&self) -> &Arc<SessionState> {
        &self.state
    }
}

impl Drop for SessionConfig {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Expand `/~/` to the user's identity and, for query-based sync, append the
/// per-user partial-sync namespace.
pub fn resolve_realm_path(
    realm_path: &str,
    identity: Option<&str>,
    query_based_sync: bool,
) -> Result<String> {
    let require_identity = || {
        identity.ok_or_else(|| {
            Error::config(format!("realm path {realm_path:?} needs a user identity"))
        })
    };

    let mut resolved = realm_path.to_owned();
    if realm_path.contains(ROOT_PLACEHOLDER) {
        let identity = require_identity()?;
        resolved = realm_path.replacen(ROOT_PLACEHOLDER, &format!("/{identity}/"), 1);
    }
    if query_based_sync {
        let identity = require_identity()?;
        resolved = format!("{resolved}/__partial/{identity}/graphql-client");
    }
    Ok(resolved)
}

/// HTTP and WebSocket GraphQL endpoints for `realm_path` on `server`.
pub fn graphql_endpoints(server: &Url, realm_path: &str) -> Result<(Url, Url)> {
    let ws_scheme = match server.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(Error::config(format!("server URL must be http or https, got {other:?}")))
        }
    };

    let http = endpoint(server, &format!("/graphql/{}", urlencoding::encode(realm_path)));
    let mut ws = http.clone();
    ws.set_scheme(ws_scheme)
        .map_err(|()| Error::config(format!("cannot map {} to {ws_scheme}", http.scheme())))?;
    Ok((http, ws))
}

/// Delay until `margin` before `expires_at_ms`, or zero if already inside it.
pub fn refresh_delay(expires_at_ms: u64, now_ms: u64, margin: Duration) -> Duration {
    Duration::from_millis(expires_at_ms.saturating_sub(now_ms)).saturating_sub(margin)
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
