// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authentication and token refresh for a Realm Object Server GraphQL client.
//!
//! Log in with [`Credentials`] to get a [`User`], then open a
//! [`SessionConfig`] per realm path. The session resolves the GraphQL
//! endpoints, fetches a path-scoped access token, and keeps it fresh in the
//! background. [`HttpLink`] and [`SubscriptionLink`] apply the token to
//! outgoing requests.

pub mod auth;
pub mod config;
pub mod credentials;
pub mod error;
pub mod http;
pub mod link;
pub mod persist;
pub mod session;
pub mod user;

pub use auth::{AccessToken, AuthClient, TokenRefresher};
pub use config::AuthConfig;
pub use credentials::{Credentials, Provider};
pub use error::{Error, ErrorKind, Result};
pub use link::{GraphQLRequest, GraphQLSocket, HttpLink, SubscriptionLink};
pub use persist::PersistedUser;
pub use session::{AuthErrorHandler, AuthHeaders, SessionConfig, SessionOptions};
pub use user::{LoginState, User, UserKind};
