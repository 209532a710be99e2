//! HTTP client for the MediaWiki action API
//!
//! One `HttpWikiApi` serves every site. Token-based sessions share its
//! connection pool; bot-password sessions get their own client so each
//! login keeps a private cookie jar.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::{ApiResult, Login, RollbackApplied, WikiApi};
use crate::auth::{AuthKind, AuthToken, Credentials, LoginMethod, RollbackToken};
use crate::error::ApiError;
use crate::response::{self, RemoteError, RevisionInfo, TopAction};

/// HTTP settings shared by every site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    /// Sent as `User-Agent`; wikis expect contact information here.
    pub user_agent: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// `maxlag` parameter sent with every request.
    pub maxlag: Option<u32>,
    /// Path of `api.php` below the site root.
    pub api_path: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            user_agent: concat!("wikirollback/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(30),
            maxlag: Some(5),
            api_path: "/w/api.php".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Method {
    Get,
    Post,
}

type Params = Vec<(&'static str, String)>;

/// [`WikiApi`] over HTTPS.
pub struct HttpWikiApi {
    config: HttpConfig,
    http_client: reqwest::Client,
}

impl HttpWikiApi {
    pub fn new(config: HttpConfig) -> ApiResult<Self> {
        let http_client = Self::builder(&config).build()?;
        Ok(HttpWikiApi {
            config,
            http_client,
        })
    }

    fn builder(config: &HttpConfig) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
    }

    fn endpoint(&self, site: &str) -> String {
        format!("https://{}{}", site, self.config.api_path)
    }

    fn base_params(&self, authenticated: bool) -> Params {
        let mut params = vec![
            ("format", "json".to_string()),
            ("formatversion", "2".to_string()),
        ];
        if let Some(maxlag) = self.config.maxlag {
            params.push(("maxlag", maxlag.to_string()));
        }
        if authenticated {
            params.push(("assert", "user".to_string()));
        }
        params
    }

    /// Send one request. The outer error is a transport/HTTP failure, the
    /// inner one an `error` object reported by the wiki.
    async fn send_raw(
        &self,
        client: &reqwest::Client,
        site: &str,
        auth: Option<&AuthToken>,
        method: Method,
        params: Params,
    ) -> ApiResult<Result<Value, RemoteError>> {
        let url = self.endpoint(site);
        let mut all = self.base_params(auth.is_some());
        all.extend(params);

        let mut request = match method {
            Method::Get => client.get(&url).query(&all),
            Method::Post => client.post(&url).form(&all),
        };
        if let Some(token) = auth.and_then(AuthToken::bearer_secret) {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?.error_for_status()?;
        let value: Value = response.json().await?;
        Ok(response::split_error(value))
    }

    async fn send(
        &self,
        site: &str,
        auth: Option<&AuthToken>,
        method: Method,
        params: Params,
    ) -> ApiResult<Value> {
        let client = self.client_for(auth);
        Ok(self.send_raw(client, site, auth, method, params).await??)
    }

    fn client_for<'a>(&'a self, auth: Option<&'a AuthToken>) -> &'a reqwest::Client {
        match auth.map(AuthToken::kind) {
            Some(AuthKind::Cookies(client)) => client,
            _ => &self.http_client,
        }
    }

    async fn top_revision(
        &self,
        site: &str,
        auth: &AuthToken,
        page_id: u64,
    ) -> ApiResult<RevisionInfo> {
        let value = self
            .send(
                site,
                Some(auth),
                Method::Get,
                vec![
                    ("action", "query".to_string()),
                    ("prop", "revisions".to_string()),
                    ("rvprop", "ids|user|tags".to_string()),
                    ("rvlimit", "1".to_string()),
                    ("pageids", page_id.to_string()),
                ],
            )
            .await?;
        response::parse_top_revision(value, page_id)
    }

    async fn login_bot_password(
        &self,
        site: &str,
        username: &str,
        password: &str,
    ) -> ApiResult<AuthToken> {
        let jar = Arc::new(reqwest::cookie::Jar::default());
        let client = Self::builder(&self.config).cookie_provider(jar).build()?;

        let value = self
            .send_raw(
                &client,
                site,
                None,
                Method::Get,
                vec![
                    ("action", "query".to_string()),
                    ("meta", "tokens".to_string()),
                    ("type", "login".to_string()),
                ],
            )
            .await??;
        let login_token = response::parse_login_token(value)?;

        let value = self
            .send_raw(
                &client,
                site,
                None,
                Method::Post,
                vec![
                    ("action", "login".to_string()),
                    ("lgname", username.to_string()),
                    ("lgpassword", password.to_string()),
                    ("lgtoken", login_token),
                ],
            )
            .await??;
        let account = response::parse_login(value, username)?;
        Ok(AuthToken::cookies(&account, client))
    }

    async fn login_access_token(&self, site: &str, token: &str) -> ApiResult<AuthToken> {
        let probe = AuthToken::bearer("", token);
        let value = self
            .send_raw(
                &self.http_client,
                site,
                Some(&probe),
                Method::Get,
                vec![
                    ("action", "query".to_string()),
                    ("meta", "userinfo".to_string()),
                ],
            )
            .await?
            .map_err(|e| match ApiError::from(e) {
                ApiError::Rejected { info, .. } => ApiError::Auth(info),
                other => other,
            })?;
        let account = response::parse_userinfo(value)?;
        Ok(AuthToken::bearer(&account, token))
    }
}

#[async_trait]
impl WikiApi for HttpWikiApi {
    async fn login(&self, site: &str, credentials: &Credentials) -> ApiResult<Login> {
        let auth = match credentials.method()? {
            LoginMethod::BotPassword { username, password } => {
                self.login_bot_password(site, username, password).await?
            }
            LoginMethod::AccessToken(token) => self.login_access_token(site, token).await?,
        };
        let expires_at = credentials
            .session_ttl_secs
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64));
        info!(site = %site, account = %auth.account(), "logged in");
        Ok(Login { auth, expires_at })
    }

    async fn fetch_rollback_token(
        &self,
        site: &str,
        auth: &AuthToken,
        page_id: u64,
    ) -> ApiResult<RollbackToken> {
        let value = self
            .send(
                site,
                Some(auth),
                Method::Get,
                vec![
                    ("action", "query".to_string()),
                    ("meta", "tokens".to_string()),
                    ("type", "rollback".to_string()),
                    ("prop", "revisions".to_string()),
                    ("rvprop", "ids|user".to_string()),
                    ("rvlimit", "1".to_string()),
                    ("pageids", page_id.to_string()),
                ],
            )
            .await?;
        debug!(site = %site, page_id, "fetched rollback token");
        response::parse_rollback_token(value, page_id)
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
        let top = self.top_revision(site, auth, page_id).await?;
        let author = match response::classify_top(&top, auth.account(), page_id)? {
            TopAction::Proceed { author } => author,
            TopAction::Done(applied) => {
                warn!(site = %site, page_id, revid = top.revid, "rollback was already applied by this account");
                return Ok(applied);
            }
        };

        let mut params = vec![
            ("action", "rollback".to_string()),
            ("pageid", page_id.to_string()),
            ("user", author),
            ("token", token.as_str().to_string()),
        ];
        if let Some(summary) = summary.filter(|s| !s.trim().is_empty()) {
            params.push(("summary", summary.to_string()));
        }
        if mark_bot {
            params.push(("markbot", "1".to_string()));
        }

        let client = self.client_for(Some(auth));
        match self
            .send_raw(client, site, Some(auth), Method::Post, params)
            .await?
        {
            Ok(value) => Ok(RollbackApplied::new(response::parse_rollback(value)?)),
            Err(remote) if remote.code == "alreadyrolled" => {
                // Someone edited between our lookup and the POST; look again.
                let current = self.top_revision(site, auth, page_id).await?;
                match response::classify_top(&current, auth.account(), page_id)? {
                    TopAction::Done(applied) => {
                        warn!(site = %site, page_id, revid = current.revid, "rollback was already applied by this account");
                        Ok(applied)
                    }
                    TopAction::Proceed { .. } => Err(ApiError::NotRollbackable(remote.info)),
                }
            }
            Err(remote) => Err(remote.into()),
        }
    }
}
