//! The wiki API boundary consumed by the rollback engine.
//!
//! All methods are async and backend-agnostic. [`crate::client::HttpWikiApi`]
//! talks to real wikis; [`crate::fakes::FakeWikiApi`] scripts responses for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthToken, Credentials, RollbackToken};
use crate::error::ApiError;

/// Result type for wiki API calls
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// A successful login.
#[derive(Debug, Clone)]
pub struct Login {
    pub auth: AuthToken,
    pub expires_at: Option<DateTime<Utc>>,
}

/// What a rollback call achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackApplied {
    /// Revision id of the rollback edit.
    pub revision_id: u64,
    /// `true` when the wiki reported the rollback as already done by this
    /// account, e.g. a retried request whose first attempt landed.
    pub already_applied: bool,
}

impl RollbackApplied {
    pub fn new(revision_id: u64) -> Self {
        RollbackApplied {
            revision_id,
            already_applied: false,
        }
    }

    pub fn already_applied(revision_id: u64) -> Self {
        RollbackApplied {
            revision_id,
            already_applied: true,
        }
    }
}

/// Remote wiki operations needed to roll back pages.
#[async_trait]
pub trait WikiApi: Send + Sync {
    /// Log in to `site`.
    async fn login(&self, site: &str, credentials: &Credentials) -> ApiResult<Login>;

    /// Fetch a rollback token, checking that `page_id` has a revision to revert.
    async fn fetch_rollback_token(
        &self,
        site: &str,
        auth: &AuthToken,
        page_id: u64,
    ) -> ApiResult<RollbackToken>;

    /// Roll back the latest consecutive edits by the top author of `page_id`.
    ///
    /// An empty or absent `summary` leaves the site's default rollback summary.
    async fn rollback(
        &self,
        site: &str,
        auth: &AuthToken,
        token: &RollbackToken,
        page_id: u64,
        summary: Option<&str>,
        mark_bot: bool,
    ) -> ApiResult<RollbackApplied>;
}
