use phaseline_utils::{ConfigError, Cost};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::model::{
    BackendEntry, ConfigSource, ExtractionSettings, PhaseTimeout, RoutingSettings, Settings,
};

/// Environment variable overriding `[budget] limit`
pub const BUDGET_LIMIT_ENV: &str = "PHASELINE_BUDGET_LIMIT";

/// Values supplied on the command line; `None` means "not given"
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub max_in_flight: Option<usize>,
    pub max_attempts: Option<u32>,
    pub phase_timeout_secs: Option<u64>,
    pub output_dir: Option<PathBuf>,
    pub budget_limit: Option<f64>,
}

/// TOML settings file structure
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    defaults: Option<DefaultsSection>,
    budget: Option<BudgetSection>,
    backends: Option<Vec<BackendEntry>>,
    routing: Option<RoutingSettings>,
    extraction: Option<ExtractionSettings>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DefaultsSection {
    max_attempts: Option<u32>,
    max_in_flight: Option<usize>,
    phase_timeout_secs: Option<u64>,
    workflow_timeout_secs: Option<u64>,
    backoff_base_ms: Option<u64>,
    backoff_max_ms: Option<u64>,
    allow_override_by_later_phase: Option<bool>,
    output_dir: Option<PathBuf>,
    spec_dir: Option<PathBuf>,
    runs_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BudgetSection {
    limit: Option<f64>,
    alert_threshold: Option<f64>,
    window_hours: Option<u64>,
    ledger_path: Option<PathBuf>,
}

impl Settings {
    /// Discover and load settings with precedence: CLI > env > file > defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or parsed, or if the
    /// layered result fails validation.
    pub fn discover(cli: &CliOverrides) -> Result<Self, ConfigError> {
        let start_dir = std::env::current_dir().map_err(|e| ConfigError::InvalidValue {
            key: "current_dir".to_string(),
            value: e.to_string(),
        })?;
        Self::discover_from(&start_dir, cli)
    }

    /// Path-driven variant of [`Settings::discover`].
    pub fn discover_from(start_dir: &Path, cli: &CliOverrides) -> Result<Self, ConfigError> {
        let config_path = match &cli.config_path {
            Some(explicit) => {
                if !explicit.exists() {
                    return Err(ConfigError::NotFound {
                        path: explicit.display().to_string(),
                    });
                }
                Some(explicit.clone())
            }
            None => Self::discover_config_file_from(start_dir),
        };

        let file = match &config_path {
            Some(path) => Self::load_config_file(path)?,
            None => TomlConfig::default(),
        };

        let mut settings = Self::layer(file, config_path.as_deref(), cli);
        settings.config_path = config_path;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from TOML text without touching the filesystem.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: TomlConfig = toml::from_str(content).map_err(|e| ConfigError::InvalidFile {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })?;
        let settings = Self::layer(file, None, &CliOverrides::default());
        settings.validate()?;
        Ok(settings)
    }

    /// Walk up from `start_dir` looking for `.phaseline/config.toml`,
    /// stopping at a repository root.
    #[must_use]
    pub fn discover_config_file_from(start_dir: &Path) -> Option<PathBuf> {
        let mut current = Some(start_dir);
        while let Some(dir) = current {
            let candidate = dir.join(".phaseline").join("config.toml");
            if candidate.is_file() {
                return Some(candidate);
            }
            if dir.join(".git").exists() {
                break;
            }
            current = dir.parent();
        }
        None
    }

    fn load_config_file(path: &Path) -> Result<TomlConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::InvalidFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn layer(file: TomlConfig, path: Option<&Path>, cli: &CliOverrides) -> Self {
        let mut settings = Settings::default();
        let file_source = path
            .map(|p| ConfigSource::ConfigFile(p.to_path_buf()))
            .unwrap_or(ConfigSource::Defaults);
        let attr = &mut settings.source_attribution;
        for key in [
            "max_attempts",
            "max_in_flight",
            "phase_timeout",
            "budget_limit",
            "backends",
            "routing",
        ] {
            attr.insert(key.to_string(), ConfigSource::Defaults);
        }

        if let Some(d) = file.defaults {
            let run = &mut settings.run;
            if let Some(v) = d.max_attempts {
                run.max_attempts = v;
                attr.insert("max_attempts".to_string(), file_source.clone());
            }
            if let Some(v) = d.max_in_flight {
                run.max_in_flight = v;
                attr.insert("max_in_flight".to_string(), file_source.clone());
            }
            if let Some(v) = d.phase_timeout_secs {
                run.phase_timeout = PhaseTimeout::from_secs(v);
                attr.insert("phase_timeout".to_string(), file_source.clone());
            }
            if let Some(v) = d.workflow_timeout_secs {
                run.workflow_timeout = Duration::from_secs(v);
            }
            if let Some(v) = d.backoff_base_ms {
                run.backoff_base = Duration::from_millis(v);
            }
            if let Some(v) = d.backoff_max_ms {
                run.backoff_max = Duration::from_millis(v);
            }
            if let Some(v) = d.allow_override_by_later_phase {
                run.allow_override_by_later_phase = v;
            }
            if let Some(v) = d.output_dir {
                run.output_dir = v;
            }
            if let Some(v) = d.spec_dir {
                run.spec_dir = v;
            }
            if let Some(v) = d.runs_dir {
                run.runs_dir = v;
            }
        }

        if let Some(b) = file.budget {
            if let Some(v) = b.limit {
                settings.budget.limit = Cost::from_units(v);
                attr.insert("budget_limit".to_string(), file_source.clone());
            }
            if let Some(v) = b.alert_threshold {
                settings.budget.alert_threshold = v;
            }
            if let Some(v) = b.window_hours {
                settings.budget.window_hours = v;
            }
            settings.budget.ledger_path = b.ledger_path;
        }

        if let Some(backends) = file.backends {
            settings.backends = backends;
            attr.insert("backends".to_string(), file_source.clone());
            // A custom catalog without routing would still point at built-in ids.
            settings.routing = RoutingSettings {
                best_effort: None,
                attempts_per_backend: RoutingSettings::DEFAULT_ATTEMPTS_PER_BACKEND,
                default: settings.backends.iter().map(|b| b.id.clone()).collect(),
                rules: Vec::new(),
            };
        }
        if let Some(routing) = file.routing {
            settings.routing = routing;
            attr.insert("routing".to_string(), file_source.clone());
        }
        if let Some(extraction) = file.extraction {
            settings.extraction = extraction;
        }

        if let Ok(raw) = std::env::var(BUDGET_LIMIT_ENV) {
            match raw.trim().parse::<f64>() {
                Ok(v) if v >= 0.0 => {
                    settings.budget.limit = Cost::from_units(v);
                    attr.insert(
                        "budget_limit".to_string(),
                        ConfigSource::Env(BUDGET_LIMIT_ENV.to_string()),
                    );
                }
                _ => debug!(value = %raw, "Ignoring unparseable {}", BUDGET_LIMIT_ENV),
            }
        }

        if let Some(v) = cli.max_attempts {
            settings.run.max_attempts = v;
            attr.insert("max_attempts".to_string(), ConfigSource::Cli);
        }
        if let Some(v) = cli.max_in_flight {
            settings.run.max_in_flight = v;
            attr.insert("max_in_flight".to_string(), ConfigSource::Cli);
        }
        if let Some(v) = cli.phase_timeout_secs {
            settings.run.phase_timeout = PhaseTimeout::from_secs(v);
            attr.insert("phase_timeout".to_string(), ConfigSource::Cli);
        }
        if let Some(v) = &cli.output_dir {
            settings.run.output_dir = v.clone();
        }
        if let Some(v) = cli.budget_limit {
            settings.budget.limit = Cost::from_units(v);
            attr.insert("budget_limit".to_string(), ConfigSource::Cli);
        }

        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phaseline_utils::{Complexity, Tier};
    use serial_test::serial;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
[defaults]
max_attempts = 3
max_in_flight = 2
phase_timeout_secs = 1

[budget]
limit = 10.0
alert_threshold = 0.5

[[backends]]
id = "local"
tier = "local"
provider = "ollama"
model = "deepseek-coder-v2:16b"
context_limit = 8000

[[backends]]
id = "cloud"
tier = "cloud"
provider = "anthropic"
model = "claude-sonnet"
structured_output = true
context_limit = 200000
input_rate = 0.003
output_rate = 0.015

[routing]
attempts_per_backend = 2
default = ["local", "cloud"]

[[routing.rules]]
complexity = "high"
prefer = ["cloud"]
"#;

    fn write_config(dir: &Path, content: &str) -> PathBuf {
        let cfg_dir = dir.join(".phaseline");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        let path = cfg_dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    #[serial]
    fn test_discovers_config_in_parent_directory() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path(), SAMPLE);
        let nested = temp.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        let settings = Settings::discover_from(&nested, &CliOverrides::default()).unwrap();

        assert_eq!(settings.config_path.as_deref(), Some(path.as_path()));
        assert_eq!(settings.run.max_attempts, 3);
        assert_eq!(settings.run.max_in_flight, 2);
        assert_eq!(settings.budget.limit, Cost::from_units(10.0));
        assert_eq!(settings.backends.len(), 2);
        assert_eq!(settings.backends[1].tier, Tier::Cloud);
        assert_eq!(
            settings.routing.rules[0].complexity,
            Some(Complexity::High)
        );
    }

    #[test]
    #[serial]
    fn test_phase_timeout_is_clamped() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        assert_eq!(
            settings.run.phase_timeout.duration,
            Duration::from_secs(PhaseTimeout::MIN_SECS)
        );
    }

    #[test]
    #[serial]
    fn test_cli_overrides_file() {
        let temp = TempDir::new().unwrap();
        write_config(temp.path(), SAMPLE);
        let cli = CliOverrides {
            max_attempts: Some(7),
            ..CliOverrides::default()
        };

        let settings = Settings::discover_from(temp.path(), &cli).unwrap();

        assert_eq!(settings.run.max_attempts, 7);
        assert_eq!(
            settings.source_attribution.get("max_attempts"),
            Some(&ConfigSource::Cli)
        );
        assert!(matches!(
            settings.source_attribution.get("max_in_flight"),
            Some(ConfigSource::ConfigFile(_))
        ));
    }

    #[test]
    #[serial]
    fn test_env_budget_overrides_file_but_not_cli() {
        let temp = TempDir::new().unwrap();
        write_config(temp.path(), SAMPLE);
        unsafe { std::env::set_var(BUDGET_LIMIT_ENV, "4.5") };

        let from_env = Settings::discover_from(temp.path(), &CliOverrides::default()).unwrap();
        let from_cli = Settings::discover_from(
            temp.path(),
            &CliOverrides {
                budget_limit: Some(2.0),
                ..CliOverrides::default()
            },
        )
        .unwrap();

        unsafe { std::env::remove_var(BUDGET_LIMIT_ENV) };
        assert_eq!(from_env.budget.limit, Cost::from_units(4.5));
        assert_eq!(from_cli.budget.limit, Cost::from_units(2.0));
    }

    #[test]
    #[serial]
    fn test_missing_explicit_config_is_not_found() {
        let cli = CliOverrides {
            config_path: Some(PathBuf::from("/definitely/not/here.toml")),
            ..CliOverrides::default()
        };
        let err = Settings::discover_from(Path::new("."), &cli).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    #[serial]
    fn test_unknown_keys_are_rejected() {
        let err = Settings::from_toml_str("[defaults]\nmax_turns = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFile { .. }));
    }

    #[test]
    #[serial]
    fn test_no_file_uses_builtin_catalog() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join(".git")).unwrap();
        let settings = Settings::discover_from(temp.path(), &CliOverrides::default()).unwrap();
        assert!(settings.config_path.is_none());
        assert_eq!(settings.backends, Settings::builtin_backends());
    }
}
