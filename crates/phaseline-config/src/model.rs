use phaseline_utils::{Complexity, Cost, TaskType, Tier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Where an effective setting came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Cli,
    Env(String),
    ConfigFile(PathBuf),
    Defaults,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env(var) => write!(f, "environment ({var})"),
            Self::ConfigFile(path) => write!(f, "config file ({})", path.display()),
            Self::Defaults => write!(f, "defaults"),
        }
    }
}

/// Per-call backend timeout, clamped to a sane minimum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTimeout {
    pub duration: Duration,
}

impl PhaseTimeout {
    pub const DEFAULT_SECS: u64 = 600;
    pub const MIN_SECS: u64 = 5;

    #[must_use]
    pub fn from_secs(secs: u64) -> Self {
        Self {
            duration: Duration::from_secs(secs.max(Self::MIN_SECS)),
        }
    }
}

impl Default for PhaseTimeout {
    fn default() -> Self {
        Self::from_secs(Self::DEFAULT_SECS)
    }
}

/// Orchestrator knobs after layering
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Total attempts per phase across all backends
    pub max_attempts: u32,
    pub max_in_flight: usize,
    pub phase_timeout: PhaseTimeout,
    pub workflow_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub allow_override_by_later_phase: bool,
    pub output_dir: PathBuf,
    pub spec_dir: PathBuf,
    /// Where finished run records are kept
    pub runs_dir: PathBuf,
}

impl RunSettings {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;
    pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;
    pub const DEFAULT_WORKFLOW_TIMEOUT_SECS: u64 = 3600;
    pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;
    pub const DEFAULT_BACKOFF_MAX_MS: u64 = 8000;
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            max_in_flight: Self::DEFAULT_MAX_IN_FLIGHT,
            phase_timeout: PhaseTimeout::default(),
            workflow_timeout: Duration::from_secs(Self::DEFAULT_WORKFLOW_TIMEOUT_SECS),
            backoff_base: Duration::from_millis(Self::DEFAULT_BACKOFF_BASE_MS),
            backoff_max: Duration::from_millis(Self::DEFAULT_BACKOFF_MAX_MS),
            allow_override_by_later_phase: false,
            output_dir: PathBuf::from("."),
            spec_dir: PathBuf::from("specifications"),
            runs_dir: PathBuf::from(".phaseline/runs"),
        }
    }
}

/// Budget limit and window
#[derive(Debug, Clone)]
pub struct BudgetSettings {
    pub limit: Cost,
    /// Fraction of the limit at which a warning is emitted
    pub alert_threshold: f64,
    pub window_hours: u64,
    /// Where the ledger window is persisted between runs
    pub ledger_path: Option<PathBuf>,
}

impl BudgetSettings {
    pub const DEFAULT_LIMIT: f64 = 10.0;
    pub const DEFAULT_ALERT_THRESHOLD: f64 = 0.8;
    pub const DEFAULT_WINDOW_HOURS: u64 = 24;
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            limit: Cost::from_units(Self::DEFAULT_LIMIT),
            alert_threshold: Self::DEFAULT_ALERT_THRESHOLD,
            window_hours: Self::DEFAULT_WINDOW_HOURS,
            ledger_path: None,
        }
    }
}

/// One `[[backends]]` entry as written in the settings file
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BackendEntry {
    pub id: String,
    pub tier: Tier,
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub structured_output: bool,
    /// Context window in tokens
    pub context_limit: u64,
    /// Cost per 1000 input tokens
    #[serde(default)]
    pub input_rate: f64,
    /// Cost per 1000 output tokens
    #[serde(default)]
    pub output_rate: f64,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

/// One `[[routing.rules]]` entry
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingRuleEntry {
    #[serde(default)]
    pub complexity: Option<Complexity>,
    #[serde(default)]
    pub task_type: Option<TaskType>,
    pub prefer: Vec<String>,
    #[serde(default)]
    pub attempts_per_backend: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingSettings {
    #[serde(default)]
    pub best_effort: Option<String>,
    #[serde(default = "RoutingSettings::default_attempts_per_backend")]
    pub attempts_per_backend: u32,
    #[serde(default)]
    pub default: Vec<String>,
    #[serde(default)]
    pub rules: Vec<RoutingRuleEntry>,
}

impl RoutingSettings {
    pub const DEFAULT_ATTEMPTS_PER_BACKEND: u32 = 2;

    fn default_attempts_per_backend() -> u32 {
        Self::DEFAULT_ATTEMPTS_PER_BACKEND
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractionSettings {
    /// Extra protected paths on top of the built-in set
    #[serde(default)]
    pub protected_paths: Vec<String>,
}

/// Fully layered settings handed to the engine at startup
#[derive(Debug, Clone)]
pub struct Settings {
    pub run: RunSettings,
    pub budget: BudgetSettings,
    pub backends: Vec<BackendEntry>,
    pub routing: RoutingSettings,
    pub extraction: ExtractionSettings,
    pub config_path: Option<PathBuf>,
    pub source_attribution: BTreeMap<String, ConfigSource>,
}

impl Settings {
    /// Backend catalog used when the settings file declares none:
    /// a local coder model and a tool-capable cloud model.
    #[must_use]
    pub fn builtin_backends() -> Vec<BackendEntry> {
        vec![
            BackendEntry {
                id: "local-coder".to_string(),
                tier: Tier::Local,
                provider: "ollama".to_string(),
                model: "deepseek-coder-v2:16b".to_string(),
                structured_output: false,
                context_limit: 16_384,
                input_rate: 0.0,
                output_rate: 0.0,
                base_url: None,
                api_key_env: None,
                max_output_tokens: None,
            },
            BackendEntry {
                id: "cloud-sonnet".to_string(),
                tier: Tier::Cloud,
                provider: "anthropic".to_string(),
                model: "claude-sonnet-4-20250514".to_string(),
                structured_output: true,
                context_limit: 200_000,
                input_rate: 0.003,
                output_rate: 0.015,
                base_url: None,
                api_key_env: Some("ANTHROPIC_API_KEY".to_string()),
                max_output_tokens: Some(8192),
            },
        ]
    }

    /// Routing used with [`Settings::builtin_backends`]: local first, cloud
    /// first for high-complexity work.
    #[must_use]
    pub fn builtin_routing() -> RoutingSettings {
        RoutingSettings {
            best_effort: None,
            attempts_per_backend: RoutingSettings::DEFAULT_ATTEMPTS_PER_BACKEND,
            default: vec!["local-coder".to_string(), "cloud-sonnet".to_string()],
            rules: vec![RoutingRuleEntry {
                complexity: Some(Complexity::High),
                task_type: None,
                prefer: vec!["cloud-sonnet".to_string(), "local-coder".to_string()],
                attempts_per_backend: None,
            }],
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            run: RunSettings::default(),
            budget: BudgetSettings::default(),
            backends: Self::builtin_backends(),
            routing: Self::builtin_routing(),
            extraction: ExtractionSettings::default(),
            config_path: None,
            source_attribution: BTreeMap::new(),
        }
    }
}
