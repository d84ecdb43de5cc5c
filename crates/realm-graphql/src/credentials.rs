// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Provider-tagged credential payloads for `POST /auth`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Identity provider that validates a [`Credentials`] payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Provider {
    Password,
    Facebook,
    Google,
    Jwt,
    AzureAd,
    Nickname,
    /// Static admin token. Handled client-side, never sent to the server.
    Admin,
    /// Anonymous access. Handled client-side, never sent to the server.
    Anonymous,
    Custom(String),
}

impl Provider {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Password => "password",
            Self::Facebook => "facebook",
            Self::Google => "google",
            Self::Jwt => "jwt",
            Self::AzureAd => "azuread",
            Self::Nickname => "nickname",
            Self::Admin => "__admin",
            Self::Anonymous => "__anonymous",
            Self::Custom(name) => name,
        }
    }
}

impl From<String> for Provider {
    fn from(s: String) -> Self {
        match s.as_str() {
            "password" => Self::Password,
            "facebook" => Self::Facebook,
            "google" => Self::Google,
            "jwt" => Self::Jwt,
            "azuread" => Self::AzureAd,
            "nickname" => Self::Nickname,
            "__admin" => Self::Admin,
            "__anonymous" => Self::Anonymous,
            _ => Self::Custom(s),
        }
    }
}

impl From<Provider> for String {
    fn from(p: Provider) -> Self {
        match p {
            Provider::Custom(name) => name,
            other => other.as_str().to_owned(),
        }
    }
}

/// Credentials exchanged for a refresh token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub provider: Provider,
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<Map<String, Value>>,
}

impl Credentials {
    /// Username/password login. Set `register` to create the user first.
    pub fn username_password(
        username: impl Into<String>,
        password: impl Into<String>,
        register: bool,
    ) -> Self {
        let password: String = password.into();
        Self {
            provider: Provider::Password,
            data: Some(username.into()),
            user_info: Some(into_map(json!({ "register": register, "password": password }))),
        }
    }

    pub fn facebook(token: impl Into<String>) -> Self {
        Self::with_token(Provider::Facebook, token)
    }

    pub fn google(token: impl Into<String>) -> Self {
        Self::with_token(Provider::Google, token)
    }

    pub fn jwt(token: impl Into<String>) -> Self {
        Self::with_token(Provider::Jwt, token)
    }

    pub fn azure_ad(token: impl Into<String>) -> Self {
        Self::with_token(Provider::AzureAd, token)
    }

    /// Nickname login (development servers only).
    pub fn nickname(nickname: impl Into<String>, is_admin: bool) -> Self {
        Self {
            provider: Provider::Nickname,
            data: Some(nickname.into()),
            user_info: Some(into_map(json!({ "is_admin": is_admin }))),
        }
    }

    /// A server admin token. The resulting user never refreshes or revokes.
    pub fn admin_token(token: impl Into<String>) -> Self {
        Self::with_token(Provider::Admin, token)
    }

    pub fn anonymous() -> Self {
        Self { provider: Provider::Anonymous, data: None, user_info: None }
    }

    /// Credentials for a provider this crate has no constructor for.
    pub fn custom(
        provider: impl Into<String>,
        token: impl Into<String>,
        user_info: Option<Map<String, Value>>,
    ) -> Self {
        Self { provider: Provider::from(provider.into()), data: Some(token.into()), user_info }
    }

    fn with_token(provider: Provider, token: impl Into<String>) -> Self {
        Self { provider, data: Some(token.into()), user_info: None }
    }
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
#[path = "credentials_tests.rs"]
mod tests;
