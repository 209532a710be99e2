//! rollback-core: the massrollback batch engine
//!
//! Reads target lists, keeps one authenticated session per wiki, rolls back
//! pages with bounded concurrency and reports one outcome per target in
//! input order.
//!
//! ## Key Components
//!
//! - [`targets`]: `site page_id` target lists and their parse diagnostics
//! - [`SessionPool`] / [`SiteSession`]: lazy per-site logins, one in flight per site
//! - [`BatchEngine`]: retries, cancellation and order-preserving execution
//! - [`BatchReport`]: outcomes, counts and exit status
//! - [`reporting`]: console and JSON rendering

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod obs;
pub mod report;
pub mod reporting;
pub mod session;
pub mod targets;
pub mod telemetry;

pub use config::Config;
pub use engine::{BatchEngine, EngineConfig, RollbackOptions};
pub use error::{Result, RollbackError};
pub use report::{BatchCounts, BatchReport, ErrorKind, Outcome};
pub use reporting::{render_report_text, write_report_json};
pub use session::{CredentialSource, SessionPool, SiteSession};
pub use targets::{load_target_list, parse_target_list, Target, TargetList, TargetParseError};
