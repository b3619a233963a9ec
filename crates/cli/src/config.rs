//! Server configuration.
//!
//! Settings are layered: built-in defaults, then an optional TOML file,
//! then `LUMEN_*` environment variables, then command-line flags.
//!
//! # Example
//!
//! ```toml
//! port = 8080
//! bind = "0.0.0.0"
//! rate_limit = 120
//! children = ["child-1", "child-2"]
//!
//! [sync]
//! conflict_window_ms = 5000
//! resolution_strategy = "highest"
//! ```

use std::path::Path;

use lumen_sync::SyncConfig;
use serde::{Deserialize, Serialize};

/// Default rate limit: 120 requests per minute per IP.
pub(crate) const DEFAULT_RATE_LIMIT: u64 = 120;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct ServeConfig {
    pub(crate) port: u16,
    pub(crate) bind: String,
    /// Requests per minute per client IP.
    pub(crate) rate_limit: u64,
    /// When set, every endpoint except `/health` and `/ws` requires it.
    #[serde(skip_serializing)]
    pub(crate) api_key: Option<String>,
    /// Known child ids. Empty accepts every child.
    pub(crate) children: Vec<String>,
    pub(crate) sync: SyncConfig,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            bind: "0.0.0.0".to_string(),
            rate_limit: DEFAULT_RATE_LIMIT,
            api_key: None,
            children: Vec::new(),
            sync: SyncConfig::default(),
        }
    }
}

impl ServeConfig {
    /// Defaults overlaid with the TOML file at `path`, if any.
    pub(crate) fn load(path: Option<&Path>) -> Result<Self, String> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("could not read '{}': {}", path.display(), e))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| format!("could not parse '{}': {}", path.display(), e))?;
        config
            .sync
            .validate()
            .map_err(|e| format!("invalid [sync] settings in '{}': {}", path.display(), e))?;
        Ok(config)
    }

    /// Override fields from `LUMEN_*` variables read through `lookup`.
    pub(crate) fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("LUMEN_PORT").and_then(|v| parse_or_warn("LUMEN_PORT", &v)) {
            self.port = port;
        }
        if let Some(bind) = lookup("LUMEN_BIND").filter(|v| !v.is_empty()) {
            self.bind = bind;
        }
        if let Some(limit) =
            lookup("LUMEN_RATE_LIMIT").and_then(|v| parse_or_warn("LUMEN_RATE_LIMIT", &v))
        {
            self.rate_limit = limit;
        }
        if let Some(key) = lookup("LUMEN_API_KEY") {
            // An empty key switches authentication off.
            self.api_key = Some(key).filter(|k| !k.is_empty());
        }
        if let Some(children) = lookup("LUMEN_CHILDREN") {
            self.children = split_list(&children);
        }
        self.sync.apply_env(lookup);
    }
}

fn parse_or_warn<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = raw, "ignoring unparseable configuration value");
            None
        }
    }
}

/// Comma-separated list, blanks dropped.
pub(crate) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
