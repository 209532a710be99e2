//! Per-site authenticated sessions and the pool that owns them.
//!
//! The pool keeps one slot per site. A slot is guarded by its own async
//! mutex, so a login on one wiki never blocks work on another, and callers
//! racing for the same site share a single login.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, PoisonError};

use chrono::{DateTime, Utc};
use mw_api::{ApiError, ApiResult, AuthToken, Credentials, RollbackApplied, RollbackToken, WikiApi};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, instrument};

use crate::metrics::METRICS;
use crate::obs;

/// Where a pool finds the credential material for a site.
pub trait CredentialSource: Send + Sync {
    /// `None` means the site has no credentials configured.
    fn credentials_for(&self, site: &str) -> Option<Credentials>;
}

/// One credential set for every site.
impl CredentialSource for Credentials {
    fn credentials_for(&self, _site: &str) -> Option<Credentials> {
        Some(self.clone())
    }
}

impl CredentialSource for HashMap<String, Credentials> {
    fn credentials_for(&self, site: &str) -> Option<Credentials> {
        self.get(site).cloned()
    }
}

/// An authenticated connection to one wiki.
///
/// The rollback token is fetched on first use and reused for the life of the
/// session. Any auth failure marks the session rejected; the pool then
/// replaces it on the next `acquire`.
pub struct SiteSession {
    site: String,
    auth: AuthToken,
    expires_at: Option<DateTime<Utc>>,
    rollback_token: OnceCell<RollbackToken>,
    rejected: AtomicBool,
    api: Arc<dyn WikiApi>,
}

impl SiteSession {
    fn new(site: &str, auth: AuthToken, expires_at: Option<DateTime<Utc>>, api: Arc<dyn WikiApi>) -> Self {
        SiteSession {
            site: site.to_string(),
            auth,
            expires_at,
            rollback_token: OnceCell::new(),
            rejected: AtomicBool::new(false),
            api,
        }
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    /// Account name the wiki reported at login.
    pub fn account(&self) -> &str {
        self.auth.account()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }

    pub fn is_rejected(&self) -> bool {
        self.rejected.load(Ordering::Acquire)
    }

    pub fn is_usable(&self) -> bool {
        !self.is_rejected() && !self.is_expired()
    }

    /// Roll back the top author's edits on `page_id`.
    ///
    /// `summary` is passed through as-is; callers normalize empty text to `None`.
    pub async fn rollback(
        &self,
        page_id: u64,
        summary: Option<&str>,
        mark_bot: bool,
    ) -> ApiResult<RollbackApplied> {
        let result = self.try_rollback(page_id, summary, mark_bot).await;
        if let Err(err) = &result {
            if err.is_auth() {
                self.rejected.store(true, Ordering::Release);
                debug!(site = %self.site, error = %err, "session rejected by wiki");
            }
        }
        result
    }

    async fn try_rollback(
        &self,
        page_id: u64,
        summary: Option<&str>,
        mark_bot: bool,
    ) -> ApiResult<RollbackApplied> {
        let token = self
            .rollback_token
            .get_or_try_init(|| self.api.fetch_rollback_token(&self.site, &self.auth, page_id))
            .await?;
        self.api
            .rollback(&self.site, &self.auth, token, page_id, summary, mark_bot)
            .await
    }
}

impl std::fmt::Debug for SiteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteSession")
            .field("site", &self.site)
            .field("auth", &self.auth)
            .field("expires_at", &self.expires_at)
            .field("rejected", &self.is_rejected())
            .finish()
    }
}

enum SlotState {
    Empty,
    Live(Arc<SiteSession>),
    /// Login was refused; remembered until `invalidate`.
    Failed(ApiError),
}

struct Slot {
    state: Mutex<SlotState>,
    logins: AtomicU32,
}

impl Slot {
    fn new() -> Self {
        Slot {
            state: Mutex::new(SlotState::Empty),
            logins: AtomicU32::new(0),
        }
    }
}

/// Hands out at most one live [`SiteSession`] per site.
pub struct SessionPool {
    api: Arc<dyn WikiApi>,
    credentials: Arc<dyn CredentialSource>,
    slots: std::sync::Mutex<HashMap<String, Arc<Slot>>>,
}

impl SessionPool {
    pub fn new(api: Arc<dyn WikiApi>, credentials: Arc<dyn CredentialSource>) -> Self {
        SessionPool {
            api,
            credentials,
            slots: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, site: &str) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            slots
                .entry(site.to_string())
                .or_insert_with(|| Arc::new(Slot::new())),
        )
    }

    fn existing_slot(&self, site: &str) -> Option<Arc<Slot>> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(site)
            .cloned()
    }

    /// Return the live session for `site`, logging in if there is none.
    ///
    /// Concurrent callers for one site wait for a single login and share its
    /// session. A refused login is cached: later calls fail with the same
    /// [`ApiError::Auth`] without contacting the wiki. Transient login
    /// failures are not cached.
    #[instrument(skip_all, fields(site = %site))]
    pub async fn acquire(&self, site: &str) -> ApiResult<Arc<SiteSession>> {
        let slot = self.slot(site);
        let mut state = slot.state.lock().await;
        match &*state {
            SlotState::Live(session) if session.is_usable() => return Ok(Arc::clone(session)),
            SlotState::Failed(err) => return Err(err.clone()),
            SlotState::Live(_) => debug!("cached session no longer usable, logging in again"),
            SlotState::Empty => {}
        }

        let Some(credentials) = self.credentials.credentials_for(site) else {
            let err = ApiError::Auth(format!("no credentials configured for {site}"));
            obs::emit_login_failed(site, &err);
            METRICS.inc_login_failures();
            *state = SlotState::Failed(err.clone());
            return Err(err);
        };

        let attempt = slot.logins.fetch_add(1, Ordering::Relaxed) + 1;
        METRICS.inc_logins();
        match self.api.login(site, &credentials).await {
            Ok(login) => {
                obs::emit_login(site, login.auth.account(), attempt);
                let session = Arc::new(SiteSession::new(
                    site,
                    login.auth,
                    login.expires_at,
                    Arc::clone(&self.api),
                ));
                *state = SlotState::Live(Arc::clone(&session));
                Ok(session)
            }
            Err(err) => {
                obs::emit_login_failed(site, &err);
                METRICS.inc_login_failures();
                *state = if err.is_auth() {
                    SlotState::Failed(err.clone())
                } else {
                    SlotState::Empty
                };
                Err(err)
            }
        }
    }

    /// Drop whatever is cached for `site`, including a remembered login
    /// failure. The next `acquire` logs in again.
    pub async fn invalidate(&self, site: &str) {
        if let Some(slot) = self.existing_slot(site) {
            *slot.state.lock().await = SlotState::Empty;
            debug!(site = %site, "session invalidated");
        }
    }

    /// Drop `session` if it is still the cached one for its site.
    ///
    /// Unlike [`SessionPool::invalidate`] this leaves a newer session alone,
    /// so workers that saw the same stale session trigger one relogin, not one
    /// each.
    pub async fn retire(&self, session: &Arc<SiteSession>) {
        let Some(slot) = self.existing_slot(session.site()) else {
            return;
        };
        let mut state = slot.state.lock().await;
        if let SlotState::Live(current) = &*state {
            if Arc::ptr_eq(current, session) {
                *state = SlotState::Empty;
                debug!(site = %session.site(), "session retired");
            }
        }
    }

    /// Number of logins attempted for `site` so far.
    pub fn logins(&self, site: &str) -> u32 {
        self.existing_slot(site)
            .map(|slot| slot.logins.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Sites the pool has seen, sorted.
    pub fn sites(&self) -> Vec<String> {
        let mut sites: Vec<String> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        sites.sort();
        sites
    }

    /// Drop every cached session and login failure. Login counts are kept.
    pub async fn close(&self) {
        let slots: Vec<Arc<Slot>> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for slot in slots {
            *slot.state.lock().await = SlotState::Empty;
        }
    }
}
