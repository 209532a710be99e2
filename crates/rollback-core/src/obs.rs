//! Structured observability hooks for batch lifecycle events.
//!
//! This module provides:
//! - A run-scoped tracing span via [`batch_span`]
//! - Emission functions for key lifecycle events: batch start, login,
//!   retry, per-target outcome, cancellation, batch finish
//!
//! Events are emitted at `info!` level unless noted (filter with `RUST_LOG`).
//! Pass `--json` to the binary for JSON lines.

use mw_api::ApiError;
use tracing::{info, warn};
use uuid::Uuid;

use crate::report::{BatchCounts, Outcome};

/// Span tagged with the run id. Attach it to the run future with
/// [`tracing::Instrument`] so worker logs carry `run_id`.
pub fn batch_span(run_id: &Uuid) -> tracing::Span {
    tracing::info_span!("wikirollback.batch", run_id = %run_id)
}

/// Emit event: batch started.
pub fn emit_batch_started(run_id: &Uuid, targets: usize, concurrency: usize) {
    info!(
        event = "batch.started",
        run_id = %run_id,
        targets = targets,
        concurrency = concurrency,
    );
}

/// Emit event: logged in to a site.
pub fn emit_login(site: &str, account: &str, attempt: u32) {
    info!(event = "session.login", site = %site, account = %account, attempt = attempt);
}

/// Emit event: login to a site failed (warning level).
pub fn emit_login_failed(site: &str, error: &ApiError) {
    warn!(event = "session.login_failed", site = %site, error = %error);
}

/// Emit event: a target is about to be retried.
pub fn emit_retry(site: &str, page_id: u64, attempt: u32, error: &ApiError, delay_ms: u64) {
    warn!(
        event = "target.retry",
        site = %site,
        page_id = page_id,
        attempt = attempt,
        error = %error,
        delay_ms = delay_ms,
    );
}

/// Emit event: a target reached its final outcome.
pub fn emit_target_finished(outcome: &Outcome) {
    match outcome {
        Outcome::Success {
            site,
            page_id,
            revision_id,
            already_applied,
            attempts,
        } => info!(
            event = "target.finished",
            site = %site,
            page_id = *page_id,
            revision_id = *revision_id,
            already_applied = *already_applied,
            attempts = *attempts,
            success = true,
        ),
        Outcome::Failure {
            site,
            page_id,
            reason,
            message,
            attempts,
        } => warn!(
            event = "target.finished",
            site = %site,
            page_id = *page_id,
            kind = %reason,
            error = %message,
            attempts = *attempts,
            success = false,
        ),
    }
}

/// Emit event: cancellation observed; `skipped` targets will not start.
pub fn emit_batch_cancelled(run_id: &Uuid, skipped: usize) {
    warn!(event = "batch.cancelled", run_id = %run_id, skipped = skipped);
}

/// Emit event: batch finished with duration and counts.
pub fn emit_batch_finished(run_id: &Uuid, duration_ms: u64, counts: &BatchCounts) {
    info!(
        event = "batch.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        succeeded = counts.succeeded,
        failed = counts.failed,
        skipped = counts.skipped,
    );
}
