//! Configuration for wikirollback
//!
//! Loaded from a TOML file (default `wikirollback.toml`). A missing file is
//! not an error: every setting has a default, and without credentials every
//! site simply fails to log in.
//!
//! ```toml
//! default_site = "en.wikipedia.org"
//! data_dir = "data"
//!
//! [engine]
//! concurrency = 4
//!
//! [credentials.default]
//! access_token = "..."
//!
//! [credentials.sites."fr.wikisource.org"]
//! username = "Example@rollbot"
//! password = "..."
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mw_api::{Credentials, HttpConfig};
use serde::Deserialize;
use tracing::debug;

use crate::engine::{EngineConfig, MAX_CONCURRENCY};
use crate::error::{Result, RollbackError};
use crate::session::CredentialSource;
use crate::targets::Target;

/// Config file used when neither `--config` nor `WIKIROLLBACK_CONFIG` is set.
pub const DEFAULT_CONFIG_FILE: &str = "wikirollback.toml";

pub const ENV_CONFIG: &str = "WIKIROLLBACK_CONFIG";
pub const ENV_ACCESS_TOKEN: &str = "WIKIROLLBACK_ACCESS_TOKEN";
pub const ENV_DEFAULT_SITE: &str = "WIKIROLLBACK_DEFAULT_SITE";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Site used by single-page `rollback` when `--site` is not given.
    pub default_site: Option<String>,
    /// Directory target lists are read from.
    pub data_dir: PathBuf,
    pub user_agent: Option<String>,
    pub engine: EngineSection,
    pub http: HttpSection,
    pub credentials: CredentialsSection,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            default_site: None,
            data_dir: PathBuf::from("data"),
            user_agent: None,
            engine: EngineSection::default(),
            http: HttpSection::default(),
            credentials: CredentialsSection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    pub concurrency: usize,
    pub transient_retries: u32,
    pub backoff_ms: u64,
    pub edit_delay_ms: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        let engine = EngineConfig::default();
        EngineSection {
            concurrency: engine.concurrency,
            transient_retries: engine.transient_retries,
            backoff_ms: engine.backoff.as_millis() as u64,
            edit_delay_ms: engine.edit_delay.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpSection {
    pub timeout_secs: u64,
    /// `0` disables the `maxlag` parameter.
    pub maxlag: u32,
    pub api_path: String,
}

impl Default for HttpSection {
    fn default() -> Self {
        let http = HttpConfig::default();
        HttpSection {
            timeout_secs: http.timeout.as_secs(),
            maxlag: http.maxlag.unwrap_or(0),
            api_path: http.api_path,
        }
    }
}

/// Credentials per site, with an optional fallback for every other site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CredentialsSection {
    pub default: Option<Credentials>,
    pub sites: HashMap<String, Credentials>,
}

impl CredentialSource for CredentialsSection {
    fn credentials_for(&self, site: &str) -> Option<Credentials> {
        self.sites
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(site))
            .map(|(_, creds)| creds)
            .or(self.default.as_ref())
            .cloned()
    }
}

impl Config {
    /// Pick the config path: explicit flag, then `WIKIROLLBACK_CONFIG`, then
    /// [`DEFAULT_CONFIG_FILE`].
    pub fn resolve_path(
        explicit: Option<PathBuf>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> PathBuf {
        explicit
            .or_else(|| lookup(ENV_CONFIG).filter(|p| !p.is_empty()).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Load and validate `path`. A file that does not exist yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| RollbackError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content)?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| RollbackError::ConfigInvalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `WIKIROLLBACK_*` overrides read through `lookup`.
    ///
    /// An access token from the environment replaces the token of the
    /// default credential set and keeps its session TTL.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(token) = lookup(ENV_ACCESS_TOKEN).filter(|t| !t.is_empty()) {
            let default = self.credentials.default.get_or_insert_with(Credentials::default);
            default.access_token = Some(token);
        }
        if let Some(site) = lookup(ENV_DEFAULT_SITE).filter(|s| !s.is_empty()) {
            self.default_site = Some(site);
        }
        self.validate()
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_CONCURRENCY).contains(&self.engine.concurrency) {
            return Err(RollbackError::ConfigInvalid(format!(
                "engine.concurrency must be between 1 and {MAX_CONCURRENCY}"
            )));
        }
        if self.http.timeout_secs == 0 {
            return Err(RollbackError::ConfigInvalid(
                "http.timeout_secs must be at least 1".to_string(),
            ));
        }
        if !self.http.api_path.starts_with('/') {
            return Err(RollbackError::ConfigInvalid(format!(
                "http.api_path must start with '/': {}",
                self.http.api_path
            )));
        }
        if let Some(site) = &self.default_site {
            Target::new(site, 1)
                .map_err(|e| RollbackError::ConfigInvalid(format!("default_site: {e}")))?;
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            concurrency: self.engine.concurrency,
            transient_retries: self.engine.transient_retries,
            backoff: Duration::from_millis(self.engine.backoff_ms),
            edit_delay: Duration::from_millis(self.engine.edit_delay_ms),
        }
    }

    pub fn http_config(&self) -> HttpConfig {
        let defaults = HttpConfig::default();
        HttpConfig {
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent),
            timeout: Duration::from_secs(self.http.timeout_secs),
            maxlag: (self.http.maxlag > 0).then_some(self.http.maxlag),
            api_path: self.http.api_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
default_site = "en.wikipedia.org"
data_dir = "lists"
user_agent = "wikirollback-test/0.1 (ops@example.org)"

[engine]
concurrency = 2
transient_retries = 3
backoff_ms = 250
edit_delay_ms = 1000

[http]
timeout_secs = 10
maxlag = 0
api_path = "/api.php"

[credentials.default]
access_token = "oauth-token"

[credentials.sites."fr.wikisource.org"]
username = "Example@rollbot"
password = "hunter2"
session_ttl_secs = 3600
"#;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.engine_config(), EngineConfig::default());
        assert_eq!(config.http_config(), HttpConfig::default());
        assert!(config.credentials.credentials_for("en.wikipedia.org").is_none());
    }

    #[test]
    fn test_parse_full_file() {
        let config = Config::from_toml(FULL).unwrap();
        assert_eq!(config.default_site.as_deref(), Some("en.wikipedia.org"));
        assert_eq!(config.data_dir, PathBuf::from("lists"));

        let engine = config.engine_config();
        assert_eq!(engine.concurrency, 2);
        assert_eq!(engine.transient_retries, 3);
        assert_eq!(engine.backoff, Duration::from_millis(250));
        assert_eq!(engine.edit_delay, Duration::from_secs(1));

        let http = config.http_config();
        assert_eq!(http.maxlag, None);
        assert_eq!(http.timeout, Duration::from_secs(10));
        assert_eq!(http.api_path, "/api.php");
        assert!(http.user_agent.contains("ops@example.org"));
    }

    #[test]
    fn test_site_credentials_override_default() {
        let config = Config::from_toml(FULL).unwrap();
        let fr = config.credentials.credentials_for("FR.wikisource.org").unwrap();
        assert_eq!(fr.username.as_deref(), Some("Example@rollbot"));
        assert_eq!(fr.session_ttl_secs, Some(3600));

        let en = config.credentials.credentials_for("en.wikipedia.org").unwrap();
        assert_eq!(en.access_token.as_deref(), Some("oauth-token"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml("[engine]\nconcurrency = 1\n").unwrap();
        assert_eq!(config.engine.concurrency, 1);
        assert_eq!(config.engine.transient_retries, 2);
        assert_eq!(config.http.api_path, "/w/api.php");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for content in [
            "[engine]\nconcurrency = 0\n",
            "[engine]\nconcurrency = 100000000000\n",
            "[http]\napi_path = \"w/api.php\"\n",
            "default_site = \"https://en.wikipedia.org\"\n",
            "unknown_key = 1\n",
            "[engine]\nconcurrency = \"four\"\n",
        ] {
            assert!(
                matches!(Config::from_toml(content), Err(RollbackError::ConfigInvalid(_))),
                "accepted: {content}"
            );
        }
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wikirollback.toml");
        std::fs::write(&path, FULL).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.engine.concurrency, 2);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::from_toml(FULL).unwrap();
        config
            .apply_overrides_from(|key| match key {
                ENV_ACCESS_TOKEN => Some("from-env".to_string()),
                ENV_DEFAULT_SITE => Some("de.wikipedia.org".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.default_site.as_deref(), Some("de.wikipedia.org"));
        let en = config.credentials.credentials_for("en.wikipedia.org").unwrap();
        assert_eq!(en.access_token.as_deref(), Some("from-env"));
        let fr = config.credentials.credentials_for("fr.wikisource.org").unwrap();
        assert_eq!(fr.access_token, None);
    }

    #[test]
    fn test_resolve_path() {
        assert_eq!(
            Config::resolve_path(Some(PathBuf::from("a.toml")), |_| Some("b.toml".to_string())),
            PathBuf::from("a.toml")
        );
        assert_eq!(
            Config::resolve_path(None, |_| Some("b.toml".to_string())),
            PathBuf::from("b.toml")
        );
        assert_eq!(
            Config::resolve_path(None, |_| None),
            PathBuf::from(DEFAULT_CONFIG_FILE)
        );
    }
}
