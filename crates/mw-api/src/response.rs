//! Decoding of MediaWiki action API responses (`format=json&formatversion=2`).

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::api::{ApiResult, RollbackApplied};
use crate::auth::{same_account, RollbackToken};
use crate::error::ApiError;

/// The token MediaWiki hands to logged-out clients.
const ANONYMOUS_TOKEN: &str = "+\\";

/// Tag MediaWiki attaches to rollback edits.
pub(crate) const ROLLBACK_TAG: &str = "mw-rollback";

/// `{"error": {"code": ..., "info": ...}}`
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RemoteError {
    pub code: String,
    #[serde(default)]
    pub info: String,
}

impl From<RemoteError> for ApiError {
    fn from(err: RemoteError) -> Self {
        ApiError::from_remote(&err.code, &err.info)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    query: T,
}

#[derive(Debug, Default, Deserialize)]
struct Tokens {
    #[serde(default)]
    logintoken: Option<String>,
    #[serde(default)]
    rollbacktoken: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokensQuery {
    #[serde(default)]
    tokens: Tokens,
    #[serde(default)]
    pages: Vec<PageInfo>,
}

#[derive(Debug, Deserialize)]
struct PagesQuery {
    #[serde(default)]
    pages: Vec<PageInfo>,
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    invalid: bool,
    #[serde(default)]
    revisions: Vec<RevisionInfo>,
}

/// The newest revision of a page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct RevisionInfo {
    pub revid: u64,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub userhidden: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RevisionInfo {
    pub fn is_rollback(&self) -> bool {
        self.tags.iter().any(|t| t == ROLLBACK_TAG)
    }
}

#[derive(Debug, Deserialize)]
struct LoginEnvelope {
    login: LoginResult,
}

#[derive(Debug, Deserialize)]
struct LoginResult {
    result: String,
    #[serde(default)]
    lgusername: Option<String>,
    #[serde(default)]
    reason: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct UserInfoQuery {
    userinfo: UserInfo,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    name: String,
    #[serde(default)]
    anon: bool,
}

#[derive(Debug, Deserialize)]
struct RollbackEnvelope {
    rollback: RollbackResult,
}

#[derive(Debug, Deserialize)]
struct RollbackResult {
    revid: u64,
}

/// Split a response into its payload or the remote error it carries.
pub(crate) fn split_error(value: Value) -> Result<Value, RemoteError> {
    match value.get("error") {
        Some(err) => Err(serde_json::from_value(err.clone()).unwrap_or(RemoteError {
            code: "unknown".to_string(),
            info: err.to_string(),
        })),
        None => Ok(value),
    }
}

fn decode<T: DeserializeOwned>(value: Value, what: &str) -> ApiResult<T> {
    serde_json::from_value(value).map_err(|e| ApiError::Rejected {
        code: "unexpected-response".to_string(),
        info: format!("{what}: {e}"),
    })
}

pub(crate) fn parse_login_token(value: Value) -> ApiResult<String> {
    let envelope: Envelope<TokensQuery> = decode(value, "login token")?;
    envelope
        .query
        .tokens
        .logintoken
        .ok_or_else(|| ApiError::Auth("wiki returned no login token".to_string()))
}

/// Returns the canonical account name of a successful `action=login`.
pub(crate) fn parse_login(value: Value, requested: &str) -> ApiResult<String> {
    let envelope: LoginEnvelope = decode(value, "login")?;
    let login = envelope.login;
    if login.result != "Success" {
        let reason = match login.reason {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => login.result.clone(),
        };
        return Err(ApiError::Auth(format!("login {}: {}", login.result, reason)));
    }
    Ok(login.lgusername.unwrap_or_else(|| {
        requested
            .split_once('@')
            .map_or(requested, |(account, _)| account)
            .to_string()
    }))
}

pub(crate) fn parse_userinfo(value: Value) -> ApiResult<String> {
    let envelope: Envelope<UserInfoQuery> = decode(value, "userinfo")?;
    let info = envelope.query.userinfo;
    if info.anon {
        return Err(ApiError::Auth(
            "access token was not accepted (request ran anonymously)".to_string(),
        ));
    }
    Ok(info.name)
}

fn top_of(pages: Vec<PageInfo>, page_id: u64) -> ApiResult<RevisionInfo> {
    let page = pages
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::NotRollbackable(format!("page {page_id} not found")))?;
    if page.missing || page.invalid {
        return Err(ApiError::NotRollbackable(format!(
            "page {page_id} does not exist"
        )));
    }
    let top = page
        .revisions
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::NotRollbackable(format!("page {page_id} has no revisions")))?;
    if top.userhidden || top.user.is_none() {
        return Err(ApiError::NotRollbackable(format!(
            "author of the latest revision of page {page_id} is hidden"
        )));
    }
    Ok(top)
}

/// What to do about the newest revision of a page before rolling it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TopAction {
    /// Roll back this author's edits.
    Proceed { author: String },
    /// The top revision is our own rollback; nothing left to do.
    Done(RollbackApplied),
}

/// Decide between rolling back `top` and treating the page as already done.
///
/// A rollback by `account` on top means an earlier attempt landed; rolling
/// it back again would restore the reverted edits. A rollback by anyone else
/// means the page was already cleaned up and is not ours to touch.
pub(crate) fn classify_top(top: &RevisionInfo, account: &str, page_id: u64) -> ApiResult<TopAction> {
    let Some(author) = top.user.as_deref().filter(|_| !top.userhidden) else {
        return Err(ApiError::NotRollbackable(format!(
            "author of the latest revision of page {page_id} is hidden"
        )));
    };
    if !top.is_rollback() {
        return Ok(TopAction::Proceed {
            author: author.to_string(),
        });
    }
    if same_account(author, account) {
        Ok(TopAction::Done(RollbackApplied::already_applied(top.revid)))
    } else {
        Err(ApiError::NotRollbackable(format!(
            "page {page_id} was already rolled back by {author}"
        )))
    }
}

pub(crate) fn parse_top_revision(value: Value, page_id: u64) -> ApiResult<RevisionInfo> {
    let envelope: Envelope<PagesQuery> = decode(value, "revisions")?;
    top_of(envelope.query.pages, page_id)
}

pub(crate) fn parse_rollback_token(value: Value, page_id: u64) -> ApiResult<RollbackToken> {
    let envelope: Envelope<TokensQuery> = decode(value, "rollback token")?;
    let query = envelope.query;
    let token = match query.tokens.rollbacktoken {
        Some(t) if t != ANONYMOUS_TOKEN => t,
        Some(_) => {
            return Err(ApiError::Auth(
                "wiki handed out an anonymous rollback token".to_string(),
            ))
        }
        None => return Err(ApiError::Auth("wiki returned no rollback token".to_string())),
    };
    top_of(query.pages, page_id)?;
    Ok(RollbackToken::new(token))
}

pub(crate) fn parse_rollback(value: Value) -> ApiResult<u64> {
    let envelope: RollbackEnvelope = decode(value, "rollback")?;
    Ok(envelope.rollback.revid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_error_extracts_code_and_info() {
        let err = split_error(json!({
            "error": {"code": "badtoken", "info": "Invalid CSRF token."},
            "servedby": "mw1234"
        }))
        .unwrap_err();
        assert_eq!(err.code, "badtoken");
        assert!(ApiError::from(err).is_auth());

        assert!(split_error(json!({"batchcomplete": true})).is_ok());
    }

    #[test]
    fn test_rollback_token_rejects_anonymous_token() {
        let value = json!({
            "query": {
                "tokens": {"rollbacktoken": "+\\"},
                "pages": [{"pageid": 5, "revisions": [{"revid": 9, "user": "Vandal"}]}]
            }
        });
        assert!(parse_rollback_token(value, 5).unwrap_err().is_auth());
    }

    #[test]
    fn test_rollback_token_checks_page_state() {
        let missing = json!({
            "query": {
                "tokens": {"rollbacktoken": "abc+\\"},
                "pages": [{"pageid": 5, "missing": true}]
            }
        });
        assert!(matches!(
            parse_rollback_token(missing, 5),
            Err(ApiError::NotRollbackable(_))
        ));

        let ok = json!({
            "query": {
                "tokens": {"rollbacktoken": "abc+\\"},
                "pages": [{"pageid": 5, "revisions": [{"revid": 9, "user": "Vandal"}]}]
            }
        });
        assert_eq!(parse_rollback_token(ok, 5).unwrap().as_str(), "abc+\\");
    }

    #[test]
    fn test_top_revision_with_hidden_author_is_not_rollbackable() {
        let value = json!({
            "query": {"pages": [{"pageid": 7, "revisions": [{"revid": 11, "userhidden": true}]}]}
        });
        assert!(matches!(
            parse_top_revision(value, 7),
            Err(ApiError::NotRollbackable(_))
        ));
    }

    #[test]
    fn test_top_revision_reports_rollback_tag() {
        let value = json!({
            "query": {"pages": [{"pageid": 7, "revisions": [
                {"revid": 12, "user": "Rollback Bot", "tags": ["mw-rollback"]}
            ]}]}
        });
        let top = parse_top_revision(value, 7).unwrap();
        assert_eq!(top.revid, 12);
        assert!(top.is_rollback());
    }

    fn revision(revid: u64, user: &str, tags: &[&str]) -> RevisionInfo {
        RevisionInfo {
            revid,
            user: Some(user.to_string()),
            userhidden: false,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_own_rollback_on_top_is_already_applied() {
        // Timed-out attempt landed; the retry must not revert our own rollback.
        let top = revision(1001, "Rollback_Bot", &["mw-rollback"]);
        assert_eq!(
            classify_top(&top, "Rollback Bot", 5).unwrap(),
            TopAction::Done(RollbackApplied::already_applied(1001))
        );
    }

    #[test]
    fn test_rollback_by_other_account_is_not_rollbackable() {
        let top = revision(1002, "Another Patroller", &["mw-rollback"]);
        let err = classify_top(&top, "Rollback Bot", 5).unwrap_err();
        assert!(matches!(err, ApiError::NotRollbackable(_)));
        assert!(err.to_string().contains("Another Patroller"));
    }

    #[test]
    fn test_ordinary_edit_proceeds_against_its_author() {
        let top = revision(990, "Vandal", &["mobile edit"]);
        assert_eq!(
            classify_top(&top, "Rollback Bot", 5).unwrap(),
            TopAction::Proceed {
                author: "Vandal".to_string()
            }
        );
    }

    #[test]
    fn test_classify_hidden_author_is_not_rollbackable() {
        let mut top = revision(990, "Vandal", &[]);
        top.userhidden = true;
        assert!(matches!(
            classify_top(&top, "Rollback Bot", 5),
            Err(ApiError::NotRollbackable(_))
        ));
    }

    #[test]
    fn test_login_result_failure_is_auth_error() {
        let value = json!({"login": {"result": "Failed", "reason": "Incorrect password."}});
        let err = parse_login(value, "Example@rollbot").unwrap_err();
        assert!(err.is_auth());
        assert!(err.to_string().contains("Incorrect password"));
    }

    #[test]
    fn test_login_success_uses_reported_account() {
        let value = json!({"login": {"result": "Success", "lguserid": 3, "lgusername": "Example"}});
        assert_eq!(parse_login(value, "Example@rollbot").unwrap(), "Example");

        let bare = json!({"login": {"result": "Success"}});
        assert_eq!(parse_login(bare, "Example@rollbot").unwrap(), "Example");
    }

    #[test]
    fn test_userinfo_anonymous_is_auth_error() {
        let anon = json!({"query": {"userinfo": {"id": 0, "name": "10.0.0.1", "anon": true}}});
        assert!(parse_userinfo(anon).unwrap_err().is_auth());

        let named = json!({"query": {"userinfo": {"id": 42, "name": "Example"}}});
        assert_eq!(parse_userinfo(named).unwrap(), "Example");
    }

    #[test]
    fn test_parse_rollback_revision() {
        let value = json!({"rollback": {
            "title": "Sandbox", "pageid": 5, "summary": "Reverted",
            "revid": 1001, "old_revid": 1000, "last_revid": 990
        }});
        assert_eq!(parse_rollback(value).unwrap(), 1001);
    }
}
