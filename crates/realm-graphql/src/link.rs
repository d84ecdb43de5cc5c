// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport glue: apply a session's endpoint and token to an HTTP POST or a
//! `graphql-ws` WebSocket handshake.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::auth::status_error;
use crate::error::{Error, Result};
use crate::session::{SessionConfig, SessionState};

/// WebSocket subprotocol spoken by the subscription endpoint.
pub const GRAPHQL_WS_PROTOCOL: &str = "graphql-ws";

/// An open, acknowledged `graphql-ws` connection.
pub type GraphQLSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Body of a GraphQL POST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
    #[serde(rename = "operationName", default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
}

impl GraphQLRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), variables: None, operation_name: None }
    }

    #[must_use]
    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = Some(variables);
        self
    }

    #[must_use]
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }
}

impl SessionConfig {
    /// HTTP link for queries and mutations against this session's endpoint.
    pub fn http_link(&self) -> HttpLink {
        HttpLink {
            http: self.user().client().http().clone(),
            endpoint: self.http_endpoint().clone(),
            state: Arc::clone(self.state()),
        }
    }

    /// WebSocket link for subscriptions against this session's endpoint.
    pub fn subscription_link(&self) -> SubscriptionLink {
        SubscriptionLink {
            endpoint: self.websocket_endpoint().clone(),
            handshake_timeout: self.user().client().config().request_timeout(),
            state: Arc::clone(self.state()),
        }
    }
}

/// Sends GraphQL POSTs carrying the session's current access token.
#[derive(Clone)]
pub struct HttpLink {
    http: reqwest::Client,
    endpoint: Url,
    state: Arc<SessionState>,
}

impl HttpLink {
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// POST `request` and return the raw response body.
    ///
    /// A 401 or 403 forces an immediate token refresh before the error is
    /// returned; the request itself is not retried.
    pub async fn execute(&self, request: &GraphQLRequest) -> Result<Value> {
        let req = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(serde_json::to_vec(request)?);
        let resp = self.state.headers().apply_to(req).send().await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!(
                realm_path = self.state.realm_path(),
                status = status.as_u16(),
                "graphql request rejected, refreshing access token"
            );
            self.state.schedule(Duration::ZERO, true);
        }
        if !status.is_success() {
            return Err(status_error(resp).await);
        }
        Ok(serde_json::from_str(&resp.text().await?)?)
    }
}

/// Opens `graphql-ws` connections authenticated with the session's token.
#[derive(Clone)]
pub struct SubscriptionLink {
    endpoint: Url,
    handshake_timeout: Duration,
    state: Arc<SessionState>,
}

#[derive(Deserialize)]
struct ServerFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl SubscriptionLink {
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Connect, send `connection_init` with the token, and wait for
    /// `connection_ack`. Keep-alives received before the ack are skipped.
    pub async fn connect(&self) -> Result<GraphQLSocket> {
        let mut request = self.endpoint.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(GRAPHQL_WS_PROTOCOL));
        let (mut socket, _) = tokio_tungstenite::connect_async(request).await?;

        let init = json!({
            "type": "connection_init",
            "payload": self.state.headers().connection_params(),
        });
        socket.send(Message::text(init.to_string())).await?;

        match tokio::time::timeout(self.handshake_timeout, await_ack(&mut socket)).await {
            Ok(Ok(())) => {
                debug!(
                    realm_path = self.state.realm_path(),
                    "subscription connection acknowledged"
                );
                Ok(socket)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Protocol(format!(
                "no connection_ack within {:?}",
                self.handshake_timeout
            ))),
        }
    }
}

async fn await_ack(socket: &mut GraphQLSocket) -> Result<()> {
    while let Some(msg) = socket.next().await {
        let text = match msg? {
            Message::Text(text) => text,
            Message::Close(frame) => {
                return Err(Error::Protocol(format!("socket closed during handshake: {frame:?}")));
            }
            _ => continue, // Ignore binary, ping, pong.
        };
        let frame: ServerFrame = serde_json::from_str(text.as_str())?;
        match frame.kind.as_str() {
            "connection_ack" => return Ok(()),
            "ka" => {}
            "connection_error" => {
                return Err(Error::Protocol(format!("connection rejected: {}", frame.payload)));
            }
            other => debug!(frame = other, "unexpected frame before connection_ack"),
        }
    }
    Err(Error::Protocol("socket closed before connection_ack".into()))
}

#[cfg(test)]
#[path = "link_tests.rs"]
mod tests;
