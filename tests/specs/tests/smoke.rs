// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end flows against the in-process mock server: login, session,
//! query, subscription, refresh, and logout.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

use realm_graphql::{
    AuthClient, AuthConfig, Credentials, ErrorKind, GraphQLRequest, GraphQLSocket, SessionConfig,
    SessionOptions, User, UserKind,
};
use realm_graphql_specs::{MockRealmServer, PASSWORD};

const TIMEOUT: Duration = Duration::from_secs(10);

async fn login(server: &MockRealmServer, username: &str) -> anyhow::Result<Arc<User>> {
    let creds = Credentials::username_password(username, PASSWORD, false);
    Ok(Arc::new(User::authenticate(&creds, &server.url()).await?))
}

/// Poll `cond` every 20ms until it holds or [`TIMEOUT`] passes.
async fn eventually(mut cond: impl FnMut() -> bool) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("condition not met within {TIMEOUT:?}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(())
}

async fn next_json(socket: &mut GraphQLSocket) -> anyhow::Result<Value> {
    loop {
        match tokio::time::timeout(TIMEOUT, socket.next()).await? {
            Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(text.as_str())?),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => anyhow::bail!("socket closed"),
        }
    }
}

// -- Login ---------------------------------------------------------------------

#[tokio::test]
async fn password_login_returns_refreshable_user() -> anyhow::Result<()> {
    let server = MockRealmServer::start().await?;
    let user = login(&server, "alice").await?;

    assert_eq!(user.identity(), Some("alice"));
    assert_eq!(user.kind(), UserKind::Refreshable);
    assert_eq!(user.token().as_deref(), Some("rt-alice"));
    assert_eq!(server.state().logins.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_rejected() -> anyhow::Result<()> {
    let server = MockRealmServer::start().await?;
    let creds = Credentials::username_password("alice", "nope", false);

    let err = match User::authenticate(&creds, &server.url()).await {
        Ok(u) => anyhow::bail!("unexpected user: {u:?}"),
        Err(e) => e,
    };
    assert_eq!(err.kind(), ErrorKind::Auth);
    assert_eq!(err.status(), Some(401));
    assert!(err.to_string().contains("credentials are invalid"), "{err}");
    Ok(())
}

#[tokio::test]
async fn nickname_login_carries_admin_flag() -> anyhow::Result<()> {
    let server = MockRealmServer::start().await?;
    let user = User::authenticate(&Credentials::nickname("root", true), &server.url()).await?;
    assert!(user.is_admin());
    assert_eq!(user.identity(), Some("root"));
    Ok(())
}

#[tokio::test]
async fn admin_token_user_skips_the_server() -> anyhow::Result<()> {
    let server = MockRealmServer::start().await?;
    let creds = Credentials::admin_token("admin-secret");
    let user = Arc::new(User::authenticate(&creds, &server.url()).await?);

    let session = SessionConfig::create(Arc::clone(&user), SessionOptions::new("/shared")).await?;
    assert_eq!(session.current_token().as_deref(), Some("admin-secret"));

    user.log_out().await;
    assert_eq!(server.state().logins.load(Ordering::SeqCst), 0);
    assert_eq!(server.state().refreshes.load(Ordering::SeqCst), 0);
    assert_eq!(server.state().revokes.load(Ordering::SeqCst), 0);
    Ok(())
}

// -- Session and query ---------------------------------------------------------

#[tokio::test]
async fn session_query_reaches_user_realm() -> anyhow::Result<()> {
    let server = MockRealmServer::start().await?;
    let user = login(&server, "alice").await?;
    let session = SessionConfig::create(user, SessionOptions::new("/~/tasks")).await?;

    assert_eq!(session.realm_path(), "/alice/tasks");
    assert_eq!(session.http_endpoint().path(), "/graphql/%2Falice%2Ftasks");

    let body = session.http_link().execute(&GraphQLRequest::new("{ tasks { id } }")).await?;
    assert_eq!(body, json!({ "data": { "path": "/alice/tasks", "query": "{ tasks { id } }" } }));
    Ok(())
}

#[tokio::test]
async fn query_based_sync_session_targets_partial_realm() -> anyhow::Result<()> {
    let server = MockRealmServer::start().await?;
    let user = login(&server, "alice").await?;
    let options = SessionOptions::new("/~/tasks").with_query_based_sync(true);
    let session = SessionConfig::create(user, options).await?;

    let body = session.http_link().execute(&GraphQLRequest::new("{ a }")).await?;
    assert_eq!(body["data"]["path"], "/alice/tasks/__partial/alice/graphql-client");
    Ok(())
}

#[tokio::test]
async fn rejected_query_refreshes_token() -> anyhow::Result<()> {
    let server = MockRealmServer::start().await?;
    let user = login(&server, "alice").await?;
    let session = SessionConfig::create(user, SessionOptions::new("/~/tasks")).await?;
    let link = session.http_link();
    let first = session.current_token();

    server.invalidate_access_tokens();
    let err = link.execute(&GraphQLRequest::new("{ a }")).await.err();
    assert_eq!(err.and_then(|e| e.status()), Some(401));

    eventually(|| session.current_token() != first).await?;
    link.execute(&GraphQLRequest::new("{ a }")).await?;
    assert_eq!(server.state().refreshes.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn token_is_refreshed_before_expiry() -> anyhow::Result<()> {
    // Expires 11s after issue, so the refresh is due about a second in.
    let server = MockRealmServer::with_access_lifetime(Duration::from_secs(11)).await?;
    let user = login(&server, "alice").await?;
    let session = SessionConfig::create(user, SessionOptions::new("/~/tasks")).await?;
    assert_eq!(session.current_token().as_deref(), Some("at-0"));

    eventually(|| session.current_token().as_deref() == Some("at-1")).await?;
    session.dispose();
    Ok(())
}

// -- Subscription --------------------------------------------------------------

#[tokio::test]
async fn subscription_handshake_and_start() -> anyhow::Result<()> {
    let server = MockRealmServer::start().await?;
    let user = login(&server, "alice").await?;
    let session = SessionConfig::create(user, SessionOptions::new("/~/tasks")).await?;

    let mut socket = session.subscription_link().connect().await?;
    let start = json!({
        "id": "1",
        "type": "start",
        "payload": { "query": "subscription { tasks { id } }" },
    });
    socket.send(Message::text(start.to_string())).await?;

    let data = next_json(&mut socket).await?;
    assert_eq!(data["type"], "data");
    assert_eq!(data["id"], "1");
    assert_eq!(data["payload"]["data"]["path"], "/alice/tasks");
    assert_eq!(next_json(&mut socket).await?, json!({ "type": "complete", "id": "1" }));

    socket.close(None).await?;
    Ok(())
}

#[tokio::test]
async fn subscription_with_stale_token_is_rejected() -> anyhow::Result<()> {
    let server = MockRealmServer::start().await?;
    let user = login(&server, "alice").await?;
    let session = SessionConfig::create(user, SessionOptions::new("/~/tasks")).await?;

    server.invalidate_access_tokens();
    let err = session.subscription_link().connect().await.err();
    assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::Protocol));
    Ok(())
}

// -- Refresh failures and logout -----------------------------------------------

#[tokio::test]
async fn revoked_refresh_token_reaches_error_handler() -> anyhow::Result<()> {
    let server = MockRealmServer::start().await?;
    let user = login(&server, "alice").await?;

    let hits = Arc::new(AtomicU32::new(0));
    let h = Arc::clone(&hits);
    let options = SessionOptions::new("/~/tasks").with_auth_error_handler(move |e| {
        assert_eq!(e.status(), Some(401));
        h.fetch_add(1, Ordering::SeqCst);
        true
    });
    let session = SessionConfig::create(Arc::clone(&user), options).await?;

    // Revoke server-side while the user still holds the token locally.
    user.client().revoke(&user).await?;
    session.refresh_token(Duration::ZERO, true);

    eventually(|| hits.load(Ordering::SeqCst) == 1).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1, "fatal error must not be retried");
    Ok(())
}

#[tokio::test]
async fn log_out_revokes_and_stops_refreshing() -> anyhow::Result<()> {
    let server = MockRealmServer::start().await?;
    let user = login(&server, "alice").await?;
    let session = SessionConfig::create(Arc::clone(&user), SessionOptions::new("/~/tasks")).await?;

    user.log_out().await;
    assert!(server.is_revoked("rt-alice"));
    assert!(!user.is_logged_in());

    session.refresh_token(Duration::ZERO, true);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.state().refreshes.load(Ordering::SeqCst), 1);

    let err = SessionConfig::create(user, SessionOptions::new("/~/other")).await.err();
    assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::Configuration));
    Ok(())
}

// -- Persistence ---------------------------------------------------------------

#[tokio::test]
async fn persisted_user_resumes_sessions() -> anyhow::Result<()> {
    let server = MockRealmServer::start().await?;
    let user = login(&server, "alice").await?;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("user.json");
    let persisted = user.to_persisted().ok_or_else(|| anyhow::anyhow!("logged out"))?;
    realm_graphql::persist::save(&path, &persisted)?;

    let restored = User::restore(
        AuthClient::new(AuthConfig::default())?,
        realm_graphql::persist::load(&path)?,
    )?;
    let session = SessionConfig::create(Arc::new(restored), SessionOptions::new("/~/tasks")).await?;
    let body = session.http_link().execute(&GraphQLRequest::new("{ a }")).await?;
    assert_eq!(body["data"]["path"], "/alice/tasks");
    assert_eq!(server.state().logins.load(Ordering::SeqCst), 1);
    Ok(())
}
