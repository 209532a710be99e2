//! Credential material and the opaque authenticated-session handle.

use std::fmt;

use serde::Deserialize;

use crate::error::ApiError;

/// Per-site credential material as it appears in configuration.
///
/// Either an OAuth 2 owner-only `access_token`, or a bot-password pair
/// (`username` of the form `Account@botname` plus `password`). The access
/// token wins when both are present.
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    /// Treat a login as expired after this many seconds.
    #[serde(default)]
    pub session_ttl_secs: Option<u64>,
}

/// How a [`Credentials`] value logs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginMethod<'a> {
    BotPassword { username: &'a str, password: &'a str },
    AccessToken(&'a str),
}

impl Credentials {
    pub fn access_token(token: &str) -> Self {
        Credentials {
            access_token: Some(token.to_string()),
            ..Default::default()
        }
    }

    pub fn bot_password(username: &str, password: &str) -> Self {
        Credentials {
            username: Some(username.to_string()),
            password: Some(password.to_string()),
            ..Default::default()
        }
    }

    pub fn with_session_ttl(mut self, secs: u64) -> Self {
        self.session_ttl_secs = Some(secs);
        self
    }

    /// Resolve the login method, rejecting incomplete material.
    pub fn method(&self) -> Result<LoginMethod<'_>, ApiError> {
        if let Some(token) = self.access_token.as_deref().filter(|t| !t.is_empty()) {
            return Ok(LoginMethod::AccessToken(token));
        }
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Ok(LoginMethod::BotPassword { username, password })
            }
            _ => Err(ApiError::Auth(
                "credentials need an access_token or a username/password pair".to_string(),
            )),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("session_ttl_secs", &self.session_ttl_secs)
            .finish()
    }
}

#[derive(Clone)]
pub(crate) enum AuthKind {
    /// Sent as `Authorization: Bearer`.
    Bearer(String),
    /// Cookie-backed login; the client owns the session's cookie jar.
    Cookies(reqwest::Client),
}

/// Opaque proof of a successful login on one site.
///
/// Carries the canonical account name the wiki reported, which is needed to
/// recognise rollbacks this account already performed.
#[derive(Clone)]
pub struct AuthToken {
    account: String,
    kind: AuthKind,
}

impl AuthToken {
    /// Token-based session (also what test doubles hand out).
    pub fn bearer(account: &str, token: &str) -> Self {
        AuthToken {
            account: account.to_string(),
            kind: AuthKind::Bearer(token.to_string()),
        }
    }

    pub(crate) fn cookies(account: &str, client: reqwest::Client) -> Self {
        AuthToken {
            account: account.to_string(),
            kind: AuthKind::Cookies(client),
        }
    }

    /// Account name as canonicalised by the wiki.
    pub fn account(&self) -> &str {
        &self.account
    }

    pub(crate) fn kind(&self) -> &AuthKind {
        &self.kind
    }

    pub(crate) fn bearer_secret(&self) -> Option<&str> {
        match &self.kind {
            AuthKind::Bearer(token) => Some(token),
            AuthKind::Cookies(_) => None,
        }
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            AuthKind::Bearer(_) => "bearer",
            AuthKind::Cookies(_) => "cookies",
        };
        f.debug_struct("AuthToken")
            .field("account", &self.account)
            .field("kind", &kind)
            .finish()
    }
}

/// Short-lived token authorising `action=rollback`.
#[derive(Clone, PartialEq, Eq)]
pub struct RollbackToken(String);

impl RollbackToken {
    pub fn new(token: impl Into<String>) -> Self {
        RollbackToken(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RollbackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RollbackToken(<redacted>)")
    }
}

/// MediaWiki treats underscores and spaces in user names as the same character.
pub fn same_account(a: &str, b: &str) -> bool {
    a.trim().replace('_', " ") == b.trim().replace('_', " ")
}
