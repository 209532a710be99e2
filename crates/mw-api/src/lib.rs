//! mw-api: the MediaWiki action API boundary for wikirollback
//!
//! This crate owns everything that touches a wiki over the network:
//! logging in, fetching rollback tokens and calling `action=rollback`.
//! Remote error codes are normalized into [`ApiError`] here so the batch
//! engine never inspects site-specific error text.
//!
//! ## Key Components
//!
//! - [`WikiApi`]: the async boundary trait
//! - [`HttpWikiApi`]: reqwest implementation against `https://{site}/w/api.php`
//! - [`fakes::FakeWikiApi`]: scripted in-memory implementation for tests

pub mod api;
mod auth;
pub mod client;
mod error;
pub mod fakes;
mod response;

pub use api::{ApiResult, Login, RollbackApplied, WikiApi};
pub use auth::{same_account, AuthToken, Credentials, LoginMethod, RollbackToken};
pub use client::{HttpConfig, HttpWikiApi};
pub use error::ApiError;
