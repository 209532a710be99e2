//! Target lists: which pages to roll back, on which wikis.
//!
//! A target list is plain text with one `site page_id` pair per line:
//!
//! ```text
//! en.wikipedia.org 1234
//! fr.wikisource.org 5678
//! ```
//!
//! Blank lines and lines starting with `#` are ignored. Lines that do not
//! parse are kept as [`TargetParseError`]s so they are reported, never
//! silently dropped.

use std::fmt;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, RollbackError};

/// One page on one wiki.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    site: String,
    page_id: u64,
}

impl Target {
    /// Validates that `site` looks like a host name and `page_id` is positive.
    pub fn new(site: &str, page_id: u64) -> std::result::Result<Self, ParseReason> {
        if !is_host_like(site) {
            return Err(ParseReason::InvalidSite(site.to_string()));
        }
        if page_id == 0 {
            return Err(ParseReason::InvalidPageId("0".to_string()));
        }
        Ok(Target {
            site: site.to_ascii_lowercase(),
            page_id,
        })
    }

    /// Parse a single `site page_id` line.
    pub fn parse(line: &str) -> std::result::Result<Self, ParseReason> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [site, page_id] = fields.as_slice() else {
            return Err(ParseReason::FieldCount(fields.len()));
        };
        let page_id: u64 = page_id
            .parse()
            .map_err(|_| ParseReason::InvalidPageId(page_id.to_string()))?;
        Target::new(site, page_id)
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn page_id(&self) -> u64 {
        self.page_id
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.site, self.page_id)
    }
}

fn is_host_like(site: &str) -> bool {
    !site.is_empty()
        && site.len() <= 253
        && !site.starts_with(['.', '-'])
        && !site.ends_with(['.', '-'])
        && site
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

/// Why a target-list line was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum ParseReason {
    #[error("line formatted incorrectly: expected `site page_id`, found {0} field(s)")]
    FieldCount(usize),

    #[error("{0} is not a positive integer page id")]
    InvalidPageId(String),

    #[error("{0:?} is not a valid site host name")]
    InvalidSite(String),
}

/// A line of the target list that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetParseError {
    /// 1-based line number.
    pub line: usize,
    pub text: String,
    #[serde(flatten)]
    pub reason: ParseReason,
}

impl fmt::Display for TargetParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {} ({})", self.line, self.reason, self.text)
    }
}

/// Result of parsing a whole target list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetList {
    /// Valid targets in file order.
    pub targets: Vec<Target>,
    /// Rejected lines in file order.
    pub errors: Vec<TargetParseError>,
}

impl TargetList {
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty() && self.errors.is_empty()
    }
}

/// Parse target-list text.
pub fn parse_target_list(text: &str) -> TargetList {
    let mut list = TargetList::default();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match Target::parse(line) {
            Ok(target) => list.targets.push(target),
            Err(reason) => {
                warn!(line = idx + 1, text = %line, %reason, "skipping malformed target line");
                list.errors.push(TargetParseError {
                    line: idx + 1,
                    text: line.to_string(),
                    reason,
                });
            }
        }
    }
    list
}

/// Read and parse `data_dir/file_name`.
///
/// `file_name` must stay inside `data_dir`: absolute paths and `..`
/// components are refused.
pub fn load_target_list(data_dir: &Path, file_name: &str) -> Result<TargetList> {
    let relative = Path::new(file_name);
    let plain = !file_name.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !plain {
        return Err(RollbackError::TargetListOutsideDataDir(file_name.to_string()));
    }

    let path = data_dir.join(relative);
    let text = std::fs::read_to_string(&path).map_err(|source| RollbackError::TargetList {
        path: path.clone(),
        source,
    })?;
    let list = parse_target_list(&text);
    debug!(
        path = %path.display(),
        targets = list.targets.len(),
        errors = list.errors.len(),
        "loaded target list"
    );
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_line() {
        let target = Target::parse("en.wikipedia.org 1234").unwrap();
        assert_eq!(target.site(), "en.wikipedia.org");
        assert_eq!(target.page_id(), 1234);
        assert_eq!(target.to_string(), "en.wikipedia.org: 1234");
    }

    #[test]
    fn test_parse_accepts_any_whitespace_separator() {
        let target = Target::parse("fr.wikisource.org\t\t5678").unwrap();
        assert_eq!(target.page_id(), 5678);
    }

    #[test]
    fn test_non_numeric_page_id_is_rejected() {
        assert_eq!(
            Target::parse("en.wikipedia.org abc"),
            Err(ParseReason::InvalidPageId("abc".to_string()))
        );
    }

    #[test]
    fn test_zero_and_negative_page_ids_are_rejected() {
        assert!(matches!(
            Target::parse("en.wikipedia.org 0"),
            Err(ParseReason::InvalidPageId(_))
        ));
        assert!(matches!(
            Target::parse("en.wikipedia.org -4"),
            Err(ParseReason::InvalidPageId(_))
        ));
    }

    #[test]
    fn test_wrong_field_count() {
        assert_eq!(
            Target::parse("en.wikipedia.org"),
            Err(ParseReason::FieldCount(1))
        );
        assert_eq!(
            Target::parse("en.wikipedia.org 1 2"),
            Err(ParseReason::FieldCount(3))
        );
    }

    #[test]
    fn test_site_must_look_like_a_host() {
        assert!(matches!(
            Target::parse("https://en.wikipedia.org 1"),
            Err(ParseReason::InvalidSite(_))
        ));
        assert!(matches!(
            Target::new("", 1),
            Err(ParseReason::InvalidSite(_))
        ));
        assert_eq!(Target::new("EN.Wikipedia.org", 1).unwrap().site(), "en.wikipedia.org");
    }

    #[test]
    fn test_parse_list_keeps_order_and_records_errors() {
        let text = "\
# reverted by request
en.wikipedia.org 100

en.wikipedia.org abc
fr.wikisource.org 200
broken-line
";
        let list = parse_target_list(text);
        assert_eq!(
            list.targets,
            vec![
                Target::new("en.wikipedia.org", 100).unwrap(),
                Target::new("fr.wikisource.org", 200).unwrap(),
            ]
        );
        assert_eq!(list.errors.len(), 2);
        assert_eq!(list.errors[0].line, 4);
        assert_eq!(list.errors[0].text, "en.wikipedia.org abc");
        assert_eq!(
            list.errors[0].reason,
            ParseReason::InvalidPageId("abc".to_string())
        );
        assert_eq!(list.errors[1].line, 6);
    }

    #[test]
    fn test_load_refuses_paths_outside_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["../secret.txt", "/etc/passwd", ""] {
            assert!(matches!(
                load_target_list(dir.path(), name),
                Err(RollbackError::TargetListOutsideDataDir(_))
            ));
        }
    }

    #[test]
    fn test_load_missing_file_is_run_level_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_target_list(dir.path(), "missing.txt").unwrap_err();
        assert!(matches!(err, RollbackError::TargetList { .. }));
    }
}
