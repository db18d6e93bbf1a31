//! Automation configuration.
//!
//! [`AutomationConfig`] controls where the database lives, the execution
//! timeouts, and any extra classifier rules layered over the built-ins.
//! Sensible defaults are provided via the [`Default`] implementation, a
//! builder-style API allows callers to customise individual fields fluently,
//! and [`AutomationConfig::from_toml_file`] loads the whole thing from disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AutomationResult;

/// Extra classifier rules for one security tier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleAdditions {
    /// Substrings matched anywhere in the normalized command.
    pub phrases: Vec<String>,
    /// Regular expressions matched against the normalized command.
    pub patterns: Vec<String>,
    /// Program names matched against the command's first token.
    pub programs: Vec<String>,
}

/// Extra classifier rules, grouped by tier.
///
/// Additions extend the built-in rule set; nothing here removes a built-in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierRules {
    /// Rules that make a command dangerous.
    pub dangerous: RuleAdditions,
    /// Rules that make a command moderate.
    pub moderate: RuleAdditions,
    /// Rules that make a command safe.
    pub safe: RuleAdditions,
}

/// Configuration for the automation core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// Where the SQLite database lives.
    ///
    /// Default: **`steno.db`** in the working directory.
    pub db_path: PathBuf,

    /// Hard ceiling on a single workflow step, in seconds.
    ///
    /// Default: **60**.
    pub step_timeout_secs: u64,

    /// Hard ceiling on a direct capability task invocation, in seconds.
    ///
    /// Default: **60**.
    pub invoke_timeout_secs: u64,

    /// How far past now the due-task sweep looks, in seconds.
    ///
    /// Default: **0** (only tasks already due).
    pub dispatch_window_secs: u64,

    /// Extra classifier rules layered over the built-ins.
    pub rules: ClassifierRules,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("steno.db"),
            step_timeout_secs: 60,
            invoke_timeout_secs: 60,
            dispatch_window_secs: 0,
            rules: ClassifierRules::default(),
        }
    }
}

impl AutomationConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file. Missing keys keep their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> AutomationResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Set the database path.
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    /// Set the per-step timeout (in seconds).
    pub fn with_step_timeout_secs(mut self, secs: u64) -> Self {
        self.step_timeout_secs = secs;
        self
    }

    /// Set the direct-invocation timeout (in seconds).
    pub fn with_invoke_timeout_secs(mut self, secs: u64) -> Self {
        self.invoke_timeout_secs = secs;
        self
    }

    /// Set the dispatch look-ahead window (in seconds).
    pub fn with_dispatch_window_secs(mut self, secs: u64) -> Self {
        self.dispatch_window_secs = secs;
        self
    }

    /// Set the extra classifier rules.
    pub fn with_rules(mut self, rules: ClassifierRules) -> Self {
        self.rules = rules;
        self
    }

    /// Per-step timeout as a [`Duration`].
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    /// Direct-invocation timeout as a [`Duration`].
    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_secs(self.invoke_timeout_secs)
    }

    /// Dispatch look-ahead window as a [`chrono::Duration`].
    pub fn dispatch_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.dispatch_window_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = AutomationConfig::default();
        assert_eq!(cfg.db_path, PathBuf::from("steno.db"));
        assert_eq!(cfg.step_timeout_secs, 60);
        assert_eq!(cfg.invoke_timeout_secs, 60);
        assert_eq!(cfg.dispatch_window_secs, 0);
        assert!(cfg.rules.dangerous.phrases.is_empty());
    }

    #[test]
    fn builder_chaining() {
        let cfg = AutomationConfig::new()
            .with_db_path("/var/lib/steno/automation.db")
            .with_step_timeout_secs(10)
            .with_invoke_timeout_secs(20)
            .with_dispatch_window_secs(30);
        assert_eq!(cfg.db_path, PathBuf::from("/var/lib/steno/automation.db"));
        assert_eq!(cfg.step_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.invoke_timeout(), Duration::from_secs(20));
        assert_eq!(cfg.dispatch_window(), chrono::Duration::seconds(30));
    }

    #[test]
    fn parses_full_toml() {
        let cfg: AutomationConfig = toml::from_str(
            r#"
            db_path = "/tmp/steno.db"
            step_timeout_secs = 5
            dispatch_window_secs = 30

            [rules.dangerous]
            phrases = ["drop schema"]

            [rules.safe]
            programs = ["rg"]
            "#,
        )
        .unwrap();

        assert_eq!(cfg.db_path, PathBuf::from("/tmp/steno.db"));
        assert_eq!(cfg.step_timeout_secs, 5);
        assert_eq!(cfg.dispatch_window_secs, 30);
        assert_eq!(cfg.rules.dangerous.phrases, vec!["drop schema"]);
        assert_eq!(cfg.rules.safe.programs, vec!["rg"]);
    }

    #[test]
    fn missing_keys_keep_defaults() {
        let cfg: AutomationConfig = toml::from_str(r#"db_path = "other.db""#).unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("other.db"));
        assert_eq!(cfg.step_timeout_secs, 60);
        assert_eq!(cfg.dispatch_window_secs, 0);
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steno.toml");
        std::fs::write(&path, "step_timeout_secs = 7\n").unwrap();

        let cfg = AutomationConfig::from_toml_file(&path).unwrap();
        assert_eq!(cfg.step_timeout_secs, 7);
    }

    #[test]
    fn invalid_toml_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steno.toml");
        std::fs::write(&path, "step_timeout_secs = \"soon\"\n").unwrap();

        assert!(AutomationConfig::from_toml_file(&path).is_err());
    }
}
