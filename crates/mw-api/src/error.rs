//! Error types for mw-api
//!
//! Every failure the wiki API can produce is normalized into one of four
//! classes here, so callers never have to inspect site-specific error text.

use thiserror::Error;

/// Normalized failure of a wiki API call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Credentials missing, login rejected, or a token/session no longer accepted.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The page state makes rollback inapplicable (single author, already reverted, ...).
    #[error("not rollbackable: {0}")]
    NotRollbackable(String),

    /// Network or service hiccup worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Any other error reported by the remote wiki.
    #[error("rejected by wiki ({code}): {info}")]
    Rejected { code: String, info: String },
}

impl ApiError {
    /// Classify a remote `error.code` / `error.info` pair.
    pub fn from_remote(code: &str, info: &str) -> Self {
        match code {
            "badtoken" | "notloggedin" | "assertuserfailed" | "assertbotfailed"
            | "assertnameduserfailed" | "readapidenied" => ApiError::Auth(info.to_string()),
            c if c.starts_with("mwoauth-invalid-authorization") => ApiError::Auth(info.to_string()),
            "onlyauthor" | "alreadyrolled" | "nouser" => {
                ApiError::NotRollbackable(info.to_string())
            }
            "maxlag" | "ratelimited" | "readonly" | "timeout" => {
                ApiError::Transient(format!("{code}: {info}"))
            }
            c if c.starts_with("internal_api_error") => {
                ApiError::Transient(format!("{code}: {info}"))
            }
            _ => ApiError::Rejected {
                code: code.to_string(),
                info: info.to_string(),
            },
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Auth(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transient(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return ApiError::Auth(err.to_string());
            }
            if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS {
                return ApiError::Rejected {
                    code: format!("http-{}", status.as_u16()),
                    info: err.to_string(),
                };
            }
        }
        ApiError::Transient(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Transient(format!("undecodable response: {err}"))
    }
}
