//! Query engine configuration.
//!
//! Values can come from a TOML file, from environment variables, or from
//! `Default`. Every loaded configuration goes through [`QueryConfig::validate`].

use crate::error::{ConfigError, QuarryError, QuarryResult};
use crate::pagination::{PageLimits, DEFAULT_LIMIT, DEFAULT_PAGE, MAX_LIMIT};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default creation-timestamp field used for the default sort.
pub const DEFAULT_SORT_FIELD: &str = "createdAt";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryConfig {
    /// Page used when the request has none or a malformed one
    pub default_page: u64,
    /// Limit used when the request has none or a malformed one
    pub default_limit: u64,
    /// Upper bound applied to requested limits
    pub max_limit: u64,
    /// Field sorted on (descending) when no sort is requested
    pub default_sort_field: String,
    /// Coerce identifier-looking values on `*id*` fields to native ids
    pub coerce_identifiers: bool,
    /// Fields covered by full-text search; empty means every string field
    pub text_search_fields: Vec<String>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_page: DEFAULT_PAGE,
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
            default_sort_field: DEFAULT_SORT_FIELD.to_string(),
            coerce_identifiers: true,
            text_search_fields: Vec::new(),
        }
    }
}

impl QueryConfig {
    /// Create from environment variables with fallback to defaults, then
    /// validate.
    ///
    /// Environment variables:
    /// - `QUARRY_DEFAULT_LIMIT`: Default page size (default: 10)
    /// - `QUARRY_MAX_LIMIT`: Maximum page size (default: 100)
    /// - `QUARRY_DEFAULT_SORT_FIELD`: Default sort field (default: createdAt)
    /// - `QUARRY_COERCE_IDENTIFIERS`: "true" or "false" (default: true)
    pub fn from_env() -> QuarryResult<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with variables resolved by `var`.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> QuarryResult<Self> {
        let defaults = Self::default();

        let config = Self {
            default_limit: var("QUARRY_DEFAULT_LIMIT")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.default_limit),
            max_limit: var("QUARRY_MAX_LIMIT")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.max_limit),
            default_sort_field: var("QUARRY_DEFAULT_SORT_FIELD")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.default_sort_field),
            coerce_identifiers: var("QUARRY_COERCE_IDENTIFIERS")
                .map(|s| s.to_lowercase() != "false")
                .unwrap_or(defaults.coerce_identifiers),
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file. Missing keys take their defaults.
    pub fn from_path(path: &Path) -> QuarryResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> QuarryResult<Self> {
        let config: QueryConfig = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - default_page >= 1
    /// - default_limit >= 1 and max_limit >= 1
    /// - default_limit <= max_limit
    /// - default_sort_field is not empty
    pub fn validate(&self) -> QuarryResult<()> {
        if self.default_page == 0 {
            return Err(invalid("default_page", &self.default_page, "must be at least 1"));
        }
        if self.default_limit == 0 {
            return Err(invalid("default_limit", &self.default_limit, "must be greater than 0"));
        }
        if self.max_limit == 0 {
            return Err(invalid("max_limit", &self.max_limit, "must be greater than 0"));
        }
        if self.default_limit > self.max_limit {
            return Err(invalid(
                "default_limit",
                &self.default_limit,
                "must not exceed max_limit",
            ));
        }
        if self.default_sort_field.trim().is_empty() {
            return Err(invalid("default_sort_field", &"\"\"", "must not be empty"));
        }
        Ok(())
    }

    /// Pagination bounds derived from this configuration.
    pub fn page_limits(&self) -> PageLimits {
        PageLimits {
            default_page: self.default_page,
            default_limit: self.default_limit,
            max_limit: self.max_limit,
        }
    }
}

fn invalid(field: &str, value: &dyn std::fmt::Display, reason: &str) -> QuarryError {
    QuarryError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}
