//! In-memory fake for the wiki API (testing only)
//!
//! `FakeWikiApi` satisfies the [`WikiApi`] contract without any network:
//! logins succeed unless a site is configured to reject them, and rollback
//! responses are scripted per `(site, page_id)`. Every call is recorded so
//! tests can assert on login counts and request order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::api::{ApiResult, Login, RollbackApplied, WikiApi};
use crate::auth::{AuthToken, Credentials, RollbackToken};
use crate::error::ApiError;

/// Account name every fake login reports.
pub const FAKE_ACCOUNT: &str = "Fake Rollbacker";

/// One recorded call against the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    Login { site: String },
    FetchRollbackToken { site: String, page_id: u64 },
    Rollback {
        site: String,
        page_id: u64,
        summary: Option<String>,
        mark_bot: bool,
    },
}

type RollbackHook = Arc<dyn Fn(&str, u64) + Send + Sync>;

#[derive(Default)]
struct FakeState {
    rejected_logins: HashMap<String, String>,
    login_delay: Option<Duration>,
    login_expiry: Option<DateTime<Utc>>,
    logins: HashMap<String, u32>,
    scripts: HashMap<(String, u64), VecDeque<ApiResult<RollbackApplied>>>,
    token_failures: HashMap<(String, u64), ApiError>,
    /// Auth tokens issued per site; only the latest one is accepted.
    live_tokens: HashMap<String, String>,
    revoked_tokens: HashSet<String>,
    calls: Vec<FakeCall>,
    next_revision: u64,
}

/// Scriptable in-memory [`WikiApi`].
#[derive(Default)]
pub struct FakeWikiApi {
    state: Mutex<FakeState>,
    rollback_hook: Mutex<Option<RollbackHook>>,
}

impl FakeWikiApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every login on `site` fail with [`ApiError::Auth`].
    pub fn reject_login(self, site: &str, reason: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .rejected_logins
            .insert(site.to_string(), reason.to_string());
        self
    }

    /// Let logins suspend for `delay` (to overlap concurrent callers).
    pub fn with_login_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().login_delay = Some(delay);
        self
    }

    /// Stamp every login with this expiry.
    pub fn with_login_expiry(self, expires_at: DateTime<Utc>) -> Self {
        self.state.lock().unwrap().login_expiry = Some(expires_at);
        self
    }

    /// Queue responses for successive rollback calls on one page. Once the
    /// queue is drained the page rolls back successfully.
    pub fn script(self, site: &str, page_id: u64, responses: Vec<ApiResult<RollbackApplied>>) -> Self {
        self.state
            .lock()
            .unwrap()
            .scripts
            .entry((site.to_string(), page_id))
            .or_default()
            .extend(responses);
        self
    }

    /// Make token fetches for one page fail.
    pub fn fail_token(self, site: &str, page_id: u64, err: ApiError) -> Self {
        self.state
            .lock()
            .unwrap()
            .token_failures
            .insert((site.to_string(), page_id), err);
        self
    }

    /// Run `hook` after every rollback call, before its response is returned.
    pub fn on_rollback(self, hook: impl Fn(&str, u64) + Send + Sync + 'static) -> Self {
        *self.rollback_hook.lock().unwrap() = Some(Arc::new(hook));
        self
    }

    /// Invalidate the current auth token of `site`, as if the wiki dropped
    /// the session. The next request with it fails with [`ApiError::Auth`].
    pub fn expire_session(&self, site: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(token) = state.live_tokens.remove(site) {
            state.revoked_tokens.insert(token);
        }
    }

    /// Number of login attempts made for `site`.
    pub fn logins(&self, site: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .logins
            .get(site)
            .copied()
            .unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Page ids rolled back on `site`, in call order (retries included).
    pub fn rollback_calls(&self, site: &str) -> Vec<u64> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                FakeCall::Rollback { site: s, page_id, .. } if s == site => Some(page_id),
                _ => None,
            })
            .collect()
    }

    fn check_token(state: &FakeState, site: &str, auth: &AuthToken) -> ApiResult<()> {
        let token = auth.bearer_secret().unwrap_or_default();
        if state.revoked_tokens.contains(token) {
            return Err(ApiError::Auth("session expired".to_string()));
        }
        match state.live_tokens.get(site) {
            Some(live) if live == token => Ok(()),
            _ => Err(ApiError::Auth(format!("token not valid on {site}"))),
        }
    }
}

#[async_trait]
impl WikiApi for FakeWikiApi {
    async fn login(&self, site: &str, credentials: &Credentials) -> ApiResult<Login> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(FakeCall::Login {
                site: site.to_string(),
            });
            *state.logins.entry(site.to_string()).or_default() += 1;
            state.login_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        credentials.method()?;

        let mut state = self.state.lock().unwrap();
        if let Some(reason) = state.rejected_logins.get(site) {
            return Err(ApiError::Auth(reason.clone()));
        }
        let count = state.logins.get(site).copied().unwrap_or_default();
        let token = format!("{site}#{count}");
        if let Some(previous) = state.live_tokens.insert(site.to_string(), token.clone()) {
            state.revoked_tokens.insert(previous);
        }
        Ok(Login {
            auth: AuthToken::bearer(FAKE_ACCOUNT, &token),
            expires_at: state.login_expiry,
        })
    }

    async fn fetch_rollback_token(
        &self,
        site: &str,
        auth: &AuthToken,
        page_id: u64,
    ) -> ApiResult<RollbackToken> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(FakeCall::FetchRollbackToken {
            site: site.to_string(),
            page_id,
        });
        Self::check_token(&state, site, auth)?;
        if let Some(err) = state.token_failures.get(&(site.to_string(), page_id)) {
            return Err(err.clone());
        }
        Ok(RollbackToken::new(format!(
            "rollback:{}",
            auth.bearer_secret().unwrap_or_default()
        )))
    }

    async fn rollback(
        &self,
        site: &str,
        auth: &AuthToken,
        token: &RollbackToken,
        page_id: u64,
        summary: Option<&str>,
        mark_bot: bool,
    ) -> ApiResult<RollbackApplied> {
        let result = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(FakeCall::Rollback {
                site: site.to_string(),
                page_id,
                summary: summary.map(str::to_string),
                mark_bot,
            });
            let expected = format!("rollback:{}", auth.bearer_secret().unwrap_or_default());
            match Self::check_token(&state, site, auth) {
                Err(err) => Err(err),
                Ok(()) if token.as_str() != expected => {
                    Err(ApiError::Auth("rollback token does not match session".to_string()))
                }
                Ok(()) => {
                    let scripted = state
                        .scripts
                        .get_mut(&(site.to_string(), page_id))
                        .and_then(VecDeque::pop_front);
                    scripted.unwrap_or_else(|| {
                        state.next_revision += 1;
                        Ok(RollbackApplied::new(page_id * 1000 + state.next_revision))
                    })
                }
            }
        };

        let hook = self.rollback_hook.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(site, page_id);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials::access_token("test")
    }

    #[tokio::test]
    async fn test_login_issues_site_scoped_tokens() {
        let api = FakeWikiApi::new();
        let a = api.login("a.example.org", &creds()).await.unwrap();
        let token = api
            .fetch_rollback_token("a.example.org", &a.auth, 1)
            .await
            .unwrap();

        let err = api
            .rollback("b.example.org", &a.auth, &token, 1, None, false)
            .await
            .unwrap_err();
        assert!(err.is_auth(), "a token from one site must not work on another");
        assert_eq!(api.logins("a.example.org"), 1);
    }

    #[tokio::test]
    async fn test_scripted_responses_then_default_success() {
        let api = FakeWikiApi::new().script(
            "a.example.org",
            7,
            vec![Err(ApiError::Transient("timeout".to_string()))],
        );
        let login = api.login("a.example.org", &creds()).await.unwrap();
        let token = api
            .fetch_rollback_token("a.example.org", &login.auth, 7)
            .await
            .unwrap();

        let first = api
            .rollback("a.example.org", &login.auth, &token, 7, None, false)
            .await;
        assert!(first.unwrap_err().is_transient());
        let second = api
            .rollback("a.example.org", &login.auth, &token, 7, Some("rv"), true)
            .await
            .unwrap();
        assert!(!second.already_applied);
        assert_eq!(api.rollback_calls("a.example.org"), vec![7, 7]);
    }

    #[tokio::test]
    async fn test_expired_session_rejects_old_token() {
        let api = FakeWikiApi::new();
        let login = api.login("a.example.org", &creds()).await.unwrap();
        api.expire_session("a.example.org");
        let err = api
            .fetch_rollback_token("a.example.org", &login.auth, 1)
            .await
            .unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn test_rejected_login_is_auth_error() {
        let api = FakeWikiApi::new().reject_login("a.example.org", "wrong password");
        let err = api.login("a.example.org", &creds()).await.unwrap_err();
        assert_eq!(err, ApiError::Auth("wrong password".to_string()));
        assert_eq!(api.logins("a.example.org"), 1);
    }
}
