//! The massrollback batch engine.
//!
//! [`BatchEngine::run`] drives every target to a final [`Outcome`] with at
//! most `concurrency` rollbacks in flight. Workers are gated by a semaphore
//! and collected through a `JoinSet`; results are stitched back by input
//! index so the report always matches the target order.
//!
//! No target's failure stops the batch. Only cancellation does, and then
//! targets that never started are reported as skipped.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mw_api::ApiError;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use crate::metrics::METRICS;
use crate::obs;
use crate::report::{BatchReport, Outcome};
use crate::session::SessionPool;
use crate::targets::Target;

/// Options applied to every target in a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackOptions {
    /// `None` defers to the wiki's default rollback summary.
    pub summary: Option<String>,
    pub mark_bot: bool,
}

impl RollbackOptions {
    /// Blank summaries become `None`; they are never sent as an override.
    pub fn new(summary: Option<String>, mark_bot: bool) -> Self {
        RollbackOptions {
            summary: summary.filter(|s| !s.trim().is_empty()),
            mark_bot,
        }
    }
}

/// Upper bound on `EngineConfig::concurrency`.
pub const MAX_CONCURRENCY: usize = 256;

/// Scheduling and retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum rollbacks in flight across all sites. `1` is sequential;
    /// values outside `1..=MAX_CONCURRENCY` are clamped.
    pub concurrency: usize,
    /// Extra attempts after a transient failure.
    pub transient_retries: u32,
    /// First retry delay; doubled for each further retry.
    pub backoff: Duration,
    /// Pause after each successful rollback, holding the worker slot.
    pub edit_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            transient_retries: 2,
            backoff: Duration::from_millis(500),
            edit_delay: Duration::ZERO,
        }
    }
}

impl EngineConfig {
    fn backoff_for(&self, retry: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(retry))
    }
}

/// Runs batches of rollbacks against a shared [`SessionPool`].
pub struct BatchEngine {
    pool: Arc<SessionPool>,
    config: EngineConfig,
}

impl BatchEngine {
    pub fn new(pool: Arc<SessionPool>, config: EngineConfig) -> Self {
        Self { pool, config }
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Roll back every target. Never cancelled.
    pub async fn run(&self, targets: Vec<Target>, options: RollbackOptions) -> BatchReport {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        self.run_until_cancelled(targets, options, cancel_rx).await
    }

    /// Roll back every target until `cancel` turns `true`.
    ///
    /// On cancellation no new target starts. Targets already running finish
    /// their current attempt but do not retry. Targets never started are
    /// reported as [`crate::report::ErrorKind::Skipped`].
    pub async fn run_until_cancelled(
        &self,
        targets: Vec<Target>,
        options: RollbackOptions,
        cancel: watch::Receiver<bool>,
    ) -> BatchReport {
        let run_id = Uuid::new_v4();
        let span = obs::batch_span(&run_id);
        self.dispatch(run_id, targets, options, cancel)
            .instrument(span)
            .await
    }

    async fn dispatch(
        &self,
        run_id: Uuid,
        targets: Vec<Target>,
        options: RollbackOptions,
        mut cancel: watch::Receiver<bool>,
    ) -> BatchReport {
        let started_at = Utc::now();
        let concurrency = self.config.concurrency.clamp(1, MAX_CONCURRENCY);
        obs::emit_batch_started(&run_id, targets.len(), concurrency);

        let options = Arc::new(options);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks: JoinSet<(usize, Outcome)> = JoinSet::new();
        let mut outcomes: Vec<Option<Outcome>> = vec![None; targets.len()];
        let mut cancelled = *cancel.borrow();
        let mut next = 0;

        while next < targets.len() && !cancelled {
            let permit = tokio::select! {
                biased;
                _ = cancellation(&mut cancel) => {
                    cancelled = true;
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Ok((idx, outcome)) = joined {
                        outcomes[idx] = Some(outcome);
                    }
                    continue;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let idx = next;
            next += 1;
            let target = targets[idx].clone();
            let pool = Arc::clone(&self.pool);
            let config = self.config.clone();
            let options = Arc::clone(&options);
            let cancel = cancel.clone();
            let span = info_span!("target", site = %target.site(), page_id = target.page_id());
            tasks.spawn(
                async move {
                    let _permit = permit;
                    let outcome = process_target(&pool, &target, &options, &config, cancel).await;
                    (idx, outcome)
                }
                .instrument(span),
            );
        }

        if cancelled {
            let skipped = targets.len() - next;
            obs::emit_batch_cancelled(&run_id, skipped);
            METRICS.add_targets_skipped(skipped as u64);
            for (slot, target) in outcomes.iter_mut().zip(&targets).skip(next) {
                *slot = Some(Outcome::skipped(target));
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, outcome)) => outcomes[idx] = Some(outcome),
                Err(err) => debug!(error = %err, "rollback task did not complete"),
            }
        }

        let outcomes: Vec<Outcome> = outcomes
            .into_iter()
            .zip(&targets)
            .map(|(slot, target)| {
                slot.unwrap_or_else(|| {
                    let err = ApiError::Transient("rollback task aborted".to_string());
                    let outcome = Outcome::failure(target, &err, 0);
                    obs::emit_target_finished(&outcome);
                    outcome
                })
            })
            .collect();

        let report = BatchReport::new(run_id, started_at, cancelled, outcomes);
        obs::emit_batch_finished(&run_id, report.duration_ms(), &report.counts);
        report
    }
}

/// Resolves once `cancel` reads `true`. Pends forever if the sender is gone.
async fn cancellation(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Sleep for `delay` unless cancelled first. Returns `false` on cancellation.
async fn pause(delay: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancellation(cancel) => false,
    }
}

/// Drive one target to its final outcome.
///
/// - auth failure on a live session: retire it and retry once with a new login
/// - transient failure: retry with exponential backoff, up to the configured bound
/// - anything else is final
async fn process_target(
    pool: &SessionPool,
    target: &Target,
    options: &RollbackOptions,
    config: &EngineConfig,
    mut cancel: watch::Receiver<bool>,
) -> Outcome {
    let mut attempts = 0u32;
    let mut relogged = false;
    let mut transient_retries = 0u32;

    let outcome = loop {
        attempts += 1;
        let result = match pool.acquire(target.site()).await {
            Ok(session) => {
                let result = session
                    .rollback(target.page_id(), options.summary.as_deref(), options.mark_bot)
                    .await;
                match result {
                    Err(err) if err.is_auth() => {
                        pool.retire(&session).await;
                        if !relogged && !*cancel.borrow() {
                            relogged = true;
                            obs::emit_retry(target.site(), target.page_id(), attempts, &err, 0);
                            METRICS.inc_retries();
                            continue;
                        }
                        Err(err)
                    }
                    other => other,
                }
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(applied) => {
                if !config.edit_delay.is_zero() {
                    pause(config.edit_delay, &mut cancel).await;
                }
                break Outcome::success(target, applied, attempts);
            }
            Err(err) if err.is_transient() && transient_retries < config.transient_retries => {
                let delay = config.backoff_for(transient_retries);
                transient_retries += 1;
                obs::emit_retry(
                    target.site(),
                    target.page_id(),
                    attempts,
                    &err,
                    delay.as_millis() as u64,
                );
                METRICS.inc_retries();
                if !pause(delay, &mut cancel).await {
                    break Outcome::failure(target, &err, attempts);
                }
            }
            Err(err) => break Outcome::failure(target, &err, attempts),
        }
    };

    if outcome.is_success() {
        METRICS.inc_rollbacks_succeeded();
    } else {
        METRICS.inc_rollbacks_failed();
    }
    obs::emit_target_finished(&outcome);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use mw_api::fakes::FakeWikiApi;
    use mw_api::Credentials;

    fn engine(api: &Arc<FakeWikiApi>, concurrency: usize) -> BatchEngine {
        let pool = SessionPool::new(api.clone(), Arc::new(Credentials::access_token("secret")));
        BatchEngine::new(
            Arc::new(pool),
            EngineConfig {
                concurrency,
                ..EngineConfig::default()
            },
        )
    }

    fn target(site: &str, page_id: u64) -> Target {
        Target::new(site, page_id).unwrap()
    }

    #[test]
    fn test_blank_summary_defers_to_site_default() {
        assert_eq!(RollbackOptions::new(Some("  ".to_string()), true).summary, None);
        assert_eq!(
            RollbackOptions::new(Some("rv spam".to_string()), false).summary.as_deref(),
            Some("rv spam")
        );
    }

    #[test]
    fn test_backoff_doubles() {
        let config = EngineConfig::default();
        assert_eq!(config.backoff_for(0), Duration::from_millis(500));
        assert_eq!(config.backoff_for(1), Duration::from_millis(1000));
        assert_eq!(config.backoff_for(2), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let api = Arc::new(FakeWikiApi::new());
        let report = engine(&api, 4).run(Vec::new(), RollbackOptions::default()).await;
        assert!(report.outcomes.is_empty());
        assert_eq!(report.counts.total(), 0);
        assert_eq!(report.exit_code(), 0);
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_concurrency_is_clamped() {
        let api = Arc::new(FakeWikiApi::new());
        for concurrency in [0, usize::MAX] {
            let report = engine(&api, concurrency)
                .run(
                    vec![target("en.wikipedia.org", 1), target("en.wikipedia.org", 2)],
                    RollbackOptions::default(),
                )
                .await;
            assert_eq!(report.counts.succeeded, 2, "concurrency {concurrency}");
        }
    }

    #[tokio::test]
    async fn test_options_reach_the_wiki() {
        let api = Arc::new(FakeWikiApi::new());
        let options = RollbackOptions::new(Some("rv vandalism".to_string()), true);
        engine(&api, 1)
            .run(vec![target("en.wikipedia.org", 1)], options)
            .await;

        let last = api.calls().pop().unwrap();
        assert_eq!(
            last,
            mw_api::fakes::FakeCall::Rollback {
                site: "en.wikipedia.org".to_string(),
                page_id: 1,
                summary: Some("rv vandalism".to_string()),
                mark_bot: true,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_rejection_is_not_retried() {
        let api = Arc::new(FakeWikiApi::new().script(
            "en.wikipedia.org",
            5,
            vec![Err(ApiError::Rejected {
                code: "protectedpage".to_string(),
                info: "This page has been protected".to_string(),
            })],
        ));
        let report = engine(&api, 1)
            .run(vec![target("en.wikipedia.org", 5)], RollbackOptions::default())
            .await;

        assert_eq!(
            report.outcomes[0].reason(),
            Some(crate::report::ErrorKind::RemoteRejected)
        );
        assert_eq!(report.outcomes[0].attempts(), 1);
        assert_eq!(api.rollback_calls("en.wikipedia.org"), vec![5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_start_skips_everything() {
        let api = Arc::new(FakeWikiApi::new());
        let (tx, rx) = watch::channel(true);
        let report = engine(&api, 2)
            .run_until_cancelled(
                vec![target("en.wikipedia.org", 1), target("en.wikipedia.org", 2)],
                RollbackOptions::default(),
                rx,
            )
            .await;
        drop(tx);

        assert!(report.cancelled);
        assert_eq!(report.counts.skipped, 2);
        assert!(api.calls().is_empty());
    }
}
