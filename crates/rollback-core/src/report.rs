//! Per-target outcomes and the batch report they are collected into.

use std::fmt;

use chrono::{DateTime, Utc};
use mw_api::{ApiError, RollbackApplied};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::targets::{Target, TargetParseError};

/// Why a target did not end in success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthError,
    NotRollbackable,
    Transient,
    RemoteRejected,
    ParseError,
    Skipped,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AuthError => "auth_error",
            ErrorKind::NotRollbackable => "not_rollbackable",
            ErrorKind::Transient => "transient",
            ErrorKind::RemoteRejected => "remote_rejected",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&ApiError> for ErrorKind {
    fn from(err: &ApiError) -> Self {
        match err {
            ApiError::Auth(_) => ErrorKind::AuthError,
            ApiError::NotRollbackable(_) => ErrorKind::NotRollbackable,
            ApiError::Transient(_) => ErrorKind::Transient,
            ApiError::Rejected { .. } => ErrorKind::RemoteRejected,
        }
    }
}

/// Final disposition of one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        site: String,
        page_id: u64,
        revision_id: u64,
        /// The wiki already showed this account's rollback on top.
        already_applied: bool,
        attempts: u32,
    },
    Failure {
        site: String,
        page_id: u64,
        reason: ErrorKind,
        message: String,
        attempts: u32,
    },
}

impl Outcome {
    pub fn success(target: &Target, applied: RollbackApplied, attempts: u32) -> Self {
        Outcome::Success {
            site: target.site().to_string(),
            page_id: target.page_id(),
            revision_id: applied.revision_id,
            already_applied: applied.already_applied,
            attempts,
        }
    }

    pub fn failure(target: &Target, err: &ApiError, attempts: u32) -> Self {
        Outcome::Failure {
            site: target.site().to_string(),
            page_id: target.page_id(),
            reason: ErrorKind::from(err),
            message: err.to_string(),
            attempts,
        }
    }

    /// A target that was never started because the run was cancelled.
    pub fn skipped(target: &Target) -> Self {
        Outcome::Failure {
            site: target.site().to_string(),
            page_id: target.page_id(),
            reason: ErrorKind::Skipped,
            message: "run cancelled before this target started".to_string(),
            attempts: 0,
        }
    }

    pub fn site(&self) -> &str {
        match self {
            Outcome::Success { site, .. } | Outcome::Failure { site, .. } => site,
        }
    }

    pub fn page_id(&self) -> u64 {
        match self {
            Outcome::Success { page_id, .. } | Outcome::Failure { page_id, .. } => *page_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// `None` for successes.
    pub fn reason(&self) -> Option<ErrorKind> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure { reason, .. } => Some(*reason),
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Outcome::Success { attempts, .. } | Outcome::Failure { attempts, .. } => *attempts,
        }
    }
}

/// Aggregate counts over a report's outcomes. `failed` excludes skipped targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BatchCounts {
    pub fn tally(outcomes: &[Outcome]) -> Self {
        outcomes
            .iter()
            .fold(BatchCounts::default(), |mut counts, outcome| {
                match outcome.reason() {
                    None => counts.succeeded += 1,
                    Some(ErrorKind::Skipped) => counts.skipped += 1,
                    Some(_) => counts.failed += 1,
                }
                counts
            })
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

/// Everything a batch run produced, in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Cancellation was requested while the run was in progress.
    pub cancelled: bool,
    /// One entry per input target; `outcomes[i]` belongs to `targets[i]`.
    pub outcomes: Vec<Outcome>,
    /// Target-list lines that never became targets.
    #[serde(default)]
    pub parse_errors: Vec<TargetParseError>,
    pub counts: BatchCounts,
}

impl BatchReport {
    pub fn new(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        cancelled: bool,
        outcomes: Vec<Outcome>,
    ) -> Self {
        let counts = BatchCounts::tally(&outcomes);
        BatchReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            cancelled,
            outcomes,
            parse_errors: Vec::new(),
            counts,
        }
    }

    pub fn with_parse_errors(mut self, parse_errors: Vec<TargetParseError>) -> Self {
        self.parse_errors = parse_errors;
        self
    }

    /// Every target succeeded and every line parsed.
    pub fn all_succeeded(&self) -> bool {
        self.parse_errors.is_empty() && self.outcomes.iter().all(Outcome::is_success)
    }

    /// Process exit status for this report: 0 on full success, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.all_succeeded() {
            0
        } else {
            1
        }
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}
