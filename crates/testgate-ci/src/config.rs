//! `testgate.toml` configuration.
//!
//! Every section is optional; a missing file means built-in defaults.
//!
//! ```toml
//! package_manager = "pnpm"
//! timeout_secs = 900
//!
//! [burn_in]
//! iterations = 20
//! task = { script = "test:e2e" }
//!
//! [selective]
//! base_ref = "origin/main"
//! unmatched = "run-all"
//! full_suite = { script = "test" }
//!
//! [[selective.rules]]
//! scope = "backend"
//! prefixes = ["packages/backend/"]
//! task = { script = "test", workspace = "backend" }
//!
//! [local_ci]
//! burn_in_iterations = 3
//! skip = ["lint"]
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use testgate_core::{CommandTaskExecutor, PackageManager, Result, Task, TestgateError};
use tracing::debug;

use crate::burn_in::{self, IterationCount};
use crate::selector::{ScopeRule, SelectorConfig, UnmatchedPolicy};
use crate::stage::{self, BuiltinStage, StageConfig};

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "testgate.toml";

pub const DEFAULT_BASE_REF: &str = "origin/main";

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestgateConfig {
    pub package_manager: PackageManager,

    /// Per-command wall-clock limit in seconds. 0 disables it.
    pub timeout_secs: u64,

    pub burn_in: BurnInSection,

    pub selective: SelectiveSection,

    pub local_ci: LocalCiSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BurnInSection {
    /// Kept signed so that a bad value is reported, not a parse failure.
    pub iterations: Option<i64>,
    pub task: Option<Task>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelectiveSection {
    pub base_ref: String,
    pub unmatched: UnmatchedPolicy,
    pub full_suite: Option<Task>,

    /// Replaces the built-in rules when non-empty.
    pub rules: Vec<RuleSection>,
}

impl Default for SelectiveSection {
    fn default() -> Self {
        Self {
            base_ref: DEFAULT_BASE_REF.to_string(),
            unmatched: UnmatchedPolicy::default(),
            full_suite: None,
            rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSection {
    pub scope: String,
    #[serde(default)]
    pub prefixes: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    pub task: Task,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocalCiSection {
    pub burn_in_iterations: Option<i64>,

    /// Builtin stage names to disable.
    pub skip: Vec<String>,
}

impl TestgateConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TestgateError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| TestgateError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            debug!(path = %path.display(), "Loading configuration");
            Self::load(path)
        } else {
            debug!(path = %path.display(), "No configuration file, using defaults");
            Ok(Self::default())
        }
    }

    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    pub fn executor(&self) -> CommandTaskExecutor {
        CommandTaskExecutor {
            package_manager: self.package_manager,
            timeout_secs: self.timeout_secs,
            ..CommandTaskExecutor::default()
        }
    }

    pub fn burn_in_iterations(&self) -> Result<IterationCount> {
        self.burn_in
            .iterations
            .map(IterationCount::new)
            .transpose()
            .map(Option::unwrap_or_default)
    }

    pub fn burn_in_task(&self) -> Task {
        self.burn_in.task.clone().unwrap_or_else(burn_in::default_task)
    }

    /// Compile the selector rules. Invalid patterns, rules without
    /// matchers and duplicate scopes are configuration errors.
    pub fn selector_config(&self) -> Result<SelectorConfig> {
        let section = &self.selective;
        let rules = if section.rules.is_empty() {
            SelectorConfig::default_rules()
        } else {
            let mut seen = HashSet::new();
            section
                .rules
                .iter()
                .map(|r| {
                    if !seen.insert(r.scope.as_str()) {
                        return Err(TestgateError::Config(format!(
                            "duplicate scope {:?}",
                            r.scope
                        )));
                    }
                    r.compile()
                })
                .collect::<Result<Vec<_>>>()?
        };

        Ok(SelectorConfig {
            rules,
            full_suite: section
                .full_suite
                .clone()
                .unwrap_or_else(SelectorConfig::default_full_suite),
            unmatched: section.unmatched,
        })
    }

    /// Builtin local CI stages with `skip` applied.
    pub fn local_ci_stages(&self) -> Result<Vec<StageConfig>> {
        let iterations = match self.local_ci.burn_in_iterations {
            Some(n) => IterationCount::new(n)?,
            None => stage::local_burn_in_iterations(),
        };

        for name in &self.local_ci.skip {
            if BuiltinStage::from_name(name).is_none() {
                return Err(TestgateError::Config(format!(
                    "unknown stage {name:?} in local_ci.skip"
                )));
            }
        }

        Ok(stage::default_stages(iterations)
            .into_iter()
            .map(|s| {
                if self.local_ci.skip.contains(&s.name) {
                    s.disabled()
                } else {
                    s
                }
            })
            .collect())
    }
}

impl RuleSection {
    fn compile(&self) -> Result<ScopeRule> {
        if self.prefixes.is_empty() && self.patterns.is_empty() {
            return Err(TestgateError::Config(format!(
                "scope {:?} has no prefixes or patterns",
                self.scope
            )));
        }

        let mut rule = ScopeRule::new(self.scope.clone(), self.task.clone());
        for prefix in &self.prefixes {
            rule = rule.with_prefix(prefix.clone());
        }
        for pattern in &self.patterns {
            rule = rule.with_pattern(pattern)?;
        }
        Ok(rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        package_manager = "pnpm"
        timeout_secs = 600

        [burn_in]
        iterations = 25
        task = { exec = ["npx", "playwright", "test"] }

        [selective]
        base_ref = "origin/develop"
        unmatched = "run-all"
        full_suite = { script = "test:all" }

        [[selective.rules]]
        scope = "api"
        prefixes = ["services/api/"]
        task = { script = "test", workspace = "api" }

        [[selective.rules]]
        scope = "styles"
        patterns = ['\.css$']
        task = { script = "test:visual" }

        [local_ci]
        burn_in_iterations = 2
        skip = ["lint"]
    "#;

    #[test]
    fn test_defaults() {
        let config = TestgateConfig::default();
        assert_eq!(config.package_manager, PackageManager::Npm);
        assert_eq!(config.selective.base_ref, "origin/main");
        assert_eq!(config.burn_in_iterations().unwrap().get(), 10);
        assert_eq!(config.burn_in_task(), Task::script("test:e2e"));

        let selector = config.selector_config().unwrap();
        let scopes: Vec<&str> = selector.rules.iter().map(|r| r.scope.as_str()).collect();
        assert_eq!(scopes, vec!["backend", "frontend", "e2e-critical"]);
        assert_eq!(selector.unmatched, UnmatchedPolicy::Skip);
    }

    #[test]
    fn test_full_file() {
        let config = TestgateConfig::from_toml_str(FULL).unwrap();
        assert_eq!(config.package_manager, PackageManager::Pnpm);
        assert_eq!(config.executor().timeout_secs, 600);
        assert_eq!(config.burn_in_iterations().unwrap().get(), 25);
        assert_eq!(config.burn_in_task().label(), "npx playwright test");

        let selector = config.selector_config().unwrap();
        assert_eq!(selector.rules.len(), 2);
        assert_eq!(selector.full_suite, Task::script("test:all"));
        assert_eq!(selector.unmatched, UnmatchedPolicy::RunAll);
        assert!(selector.rules[1].matches("web/theme.css"));

        let stages = config.local_ci_stages().unwrap();
        assert!(!stages[0].enabled);
        assert!(stages[1..].iter().all(|s| s.enabled));
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let config = TestgateConfig::from_toml_str("[burn_in]\niterations = 0\n").unwrap();
        assert!(matches!(
            config.burn_in_iterations(),
            Err(TestgateError::InvalidIterationCount(0))
        ));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(TestgateConfig::from_toml_str("iterations = 3\n").is_err());
    }

    #[test]
    fn test_rule_without_matchers_rejected() {
        let config = TestgateConfig::from_toml_str(
            r#"
            [[selective.rules]]
            scope = "empty"
            task = { script = "test" }
            "#,
        )
        .unwrap();
        let err = config.selector_config().unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_duplicate_scope_rejected() {
        let config = TestgateConfig::from_toml_str(
            r#"
            [[selective.rules]]
            scope = "api"
            prefixes = ["a/"]
            task = { script = "test" }

            [[selective.rules]]
            scope = "api"
            prefixes = ["b/"]
            task = { script = "test" }
            "#,
        )
        .unwrap();
        assert!(config.selector_config().is_err());
    }

    #[test]
    fn test_bad_pattern_rejected() {
        let config = TestgateConfig::from_toml_str(
            r#"
            [[selective.rules]]
            scope = "broken"
            patterns = ["(oops"]
            task = { script = "test" }
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.selector_config(),
            Err(TestgateError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_unknown_skip_stage_rejected() {
        let config =
            TestgateConfig::from_toml_str("[local_ci]\nskip = [\"deploy\"]\n").unwrap();
        assert!(config.local_ci_stages().is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = TestgateConfig::load_or_default(&dir.path().join("testgate.toml")).unwrap();
        assert_eq!(config, TestgateConfig::default());
    }

    #[test]
    fn test_load_malformed_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("testgate.toml");
        std::fs::write(&path, "package_manager = [").unwrap();

        let err = TestgateConfig::load_or_default(&path).unwrap_err();
        assert!(err.to_string().contains("testgate.toml"));
    }
}
