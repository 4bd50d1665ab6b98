//! Engine configuration.
//!
//! Configuration can be loaded from:
//! 1. TOML file (`taskscope.toml`)
//! 2. Environment variables (with `TASKSCOPE_` prefix)
//!
//! Environment variables override TOML configuration.
//!
//! # Example TOML Configuration
//!
//! ```toml
//! [engine]
//! standalone_tasks_enabled = true
//! allow_expressions_in_adhoc_queries = false
//! allow_expressions_in_stored_queries = true
//! max_variable_length = 4000
//! authorization_enabled = true
//! admin_groups = ["camunda-admin"]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default file consulted by [`EngineConfig::load`].
pub const DEFAULT_CONFIG_FILE: &str = "taskscope.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "TASKSCOPE_";

/// Engine-wide policy switches and limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Whether tasks without any execution or case context may be saved.
    pub standalone_tasks_enabled: bool,

    /// Whether adhoc queries (and extensions of stored filters) may carry expressions.
    pub allow_expressions_in_adhoc_queries: bool,

    /// Whether stored filters may be saved with expressions.
    pub allow_expressions_in_stored_queries: bool,

    /// Maximum length of a string or JSON variable value.
    pub max_variable_length: usize,

    /// Enables the visibility predicate on queries and default authorizations.
    pub authorization_enabled: bool,

    /// Groups whose members bypass the visibility predicate.
    pub admin_groups: Vec<String>,

    /// Comments longer than this are summarized in their short message.
    pub comment_summary_length: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            standalone_tasks_enabled: true,
            allow_expressions_in_adhoc_queries: false,
            allow_expressions_in_stored_queries: true,
            max_variable_length: 4000,
            authorization_enabled: false,
            admin_groups: Vec::new(),
            comment_summary_length: 163,
        }
    }
}

impl EngineConfig {
    /// Load configuration from file and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. TOML configuration file
    /// 3. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = if let Ok(contents) = std::fs::read_to_string(DEFAULT_CONFIG_FILE) {
            Self::from_toml(&contents)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;
        let mut config = Self::from_toml(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from TOML content (the `[engine]` table).
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        #[derive(Deserialize)]
        struct FullConfig {
            #[serde(default)]
            engine: EngineConfig,
        }

        let full: FullConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Ok(full.engine)
    }

    /// Apply `TASKSCOPE_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Unparseable values are ignored and the current setting is kept.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));

        if let Some(v) = var("STANDALONE_TASKS_ENABLED").and_then(|v| v.parse().ok()) {
            self.standalone_tasks_enabled = v;
        }
        if let Some(v) = var("ALLOW_EXPRESSIONS_IN_ADHOC_QUERIES").and_then(|v| v.parse().ok()) {
            self.allow_expressions_in_adhoc_queries = v;
        }
        if let Some(v) = var("ALLOW_EXPRESSIONS_IN_STORED_QUERIES").and_then(|v| v.parse().ok()) {
            self.allow_expressions_in_stored_queries = v;
        }
        if let Some(v) = var("MAX_VARIABLE_LENGTH").and_then(|v| v.parse().ok()) {
            self.max_variable_length = v;
        }
        if let Some(v) = var("AUTHORIZATION_ENABLED").and_then(|v| v.parse().ok()) {
            self.authorization_enabled = v;
        }
        if let Some(groups) = var("ADMIN_GROUPS") {
            self.admin_groups = groups
                .split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = var("COMMENT_SUMMARY_LENGTH").and_then(|v| v.parse().ok()) {
            self.comment_summary_length = v;
        }
    }

    /// Set whether standalone tasks may be saved.
    #[must_use]
    pub fn with_standalone_tasks_enabled(mut self, enabled: bool) -> Self {
        self.standalone_tasks_enabled = enabled;
        self
    }

    /// Set the adhoc expression policy.
    #[must_use]
    pub fn with_allow_expressions_in_adhoc_queries(mut self, allow: bool) -> Self {
        self.allow_expressions_in_adhoc_queries = allow;
        self
    }

    /// Set the stored-filter expression policy.
    #[must_use]
    pub fn with_allow_expressions_in_stored_queries(mut self, allow: bool) -> Self {
        self.allow_expressions_in_stored_queries = allow;
        self
    }

    /// Set the maximum variable value length.
    #[must_use]
    pub fn with_max_variable_length(mut self, max: usize) -> Self {
        self.max_variable_length = max;
        self
    }

    /// Enable or disable authorization checks.
    #[must_use]
    pub fn with_authorization_enabled(mut self, enabled: bool) -> Self {
        self.authorization_enabled = enabled;
        self
    }

    /// Set the administrator groups.
    #[must_use]
    pub fn with_admin_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.admin_groups = groups.into_iter().map(Into::into).collect();
        self
    }

    /// Returns `true` if any of `groups` is an administrator group.
    pub fn is_admin<S: AsRef<str>>(&self, groups: &[S]) -> bool {
        groups
            .iter()
            .any(|g| self.admin_groups.iter().any(|a| a == g.as_ref()))
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading configuration file.
    #[error("Failed to read config file '{path}': {error}")]
    Io {
        /// Path to the configuration file.
        path: String,
        /// Error message.
        error: String,
    },
    /// Parse error in configuration.
    #[error("Failed to parse config: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();

        assert!(config.standalone_tasks_enabled);
        assert!(!config.allow_expressions_in_adhoc_queries);
        assert!(config.allow_expressions_in_stored_queries);
        assert_eq!(config.max_variable_length, 4000);
        assert!(!config.authorization_enabled);
        assert!(config.admin_groups.is_empty());
        assert_eq!(config.comment_summary_length, 163);
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
            [engine]
            standalone_tasks_enabled = false
            allow_expressions_in_adhoc_queries = true
            max_variable_length = 10
            admin_groups = ["admins"]
        "#;

        let config = EngineConfig::from_toml(toml).unwrap();

        assert!(!config.standalone_tasks_enabled);
        assert!(config.allow_expressions_in_adhoc_queries);
        assert!(config.allow_expressions_in_stored_queries);
        assert_eq!(config.max_variable_length, 10);
        assert_eq!(config.admin_groups, vec!["admins".to_string()]);
    }

    #[test]
    fn test_from_toml_without_engine_table() {
        let config = EngineConfig::from_toml("[other]\nkey = 1\n").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_from_toml_parse_error() {
        let err = EngineConfig::from_toml("[engine\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\nauthorization_enabled = true").unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert!(config.authorization_enabled);
    }

    #[test]
    fn test_from_missing_file() {
        let err = EngineConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let env: HashMap<&str, &str> = [
            ("TASKSCOPE_STANDALONE_TASKS_ENABLED", "false"),
            ("TASKSCOPE_MAX_VARIABLE_LENGTH", "12"),
            ("TASKSCOPE_ADMIN_GROUPS", "a, b,,c"),
            ("TASKSCOPE_AUTHORIZATION_ENABLED", "not-a-bool"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::from_toml("[engine]\nmax_variable_length = 99\n").unwrap();
        config.apply_overrides(|k| env.get(k).map(|v| (*v).to_string()));

        assert!(!config.standalone_tasks_enabled);
        assert_eq!(config.max_variable_length, 12);
        assert_eq!(config.admin_groups, vec!["a", "b", "c"]);
        assert!(!config.authorization_enabled);
    }

    #[test]
    fn test_builders_and_admin_check() {
        let config = EngineConfig::default()
            .with_authorization_enabled(true)
            .with_admin_groups(["admins"]);
        assert!(config.is_admin(&["users", "admins"]));
        assert!(!config.is_admin(&["users"]));
        assert!(!config.is_admin::<&str>(&[]));
    }
}
