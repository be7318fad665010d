//! Backend profiles and the registry that holds them

use phaseline_config::{BackendEntry, Settings};
use phaseline_utils::{ConfigError, Cost, Tier};
use serde::Serialize;
use std::collections::HashMap;

use crate::types::TokenUsage;

/// Per-token pricing, expressed per 1000 tokens
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct CostModel {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl CostModel {
    pub const FREE: CostModel = CostModel {
        input_per_1k: 0.0,
        output_per_1k: 0.0,
    };

    #[must_use]
    pub fn project(&self, input_tokens: u64, output_tokens: u64) -> Cost {
        let units = input_tokens as f64 / 1000.0 * self.input_per_1k
            + output_tokens as f64 / 1000.0 * self.output_per_1k;
        Cost::from_units(units)
    }

    #[must_use]
    pub fn for_usage(&self, usage: TokenUsage) -> Cost {
        self.project(usage.input_tokens, usage.output_tokens)
    }
}

/// Immutable description of one execution backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendProfile {
    pub id: String,
    pub tier: Tier,
    pub provider: String,
    pub model: String,
    pub supports_structured_output: bool,
    pub cost: CostModel,
    /// Context window in tokens
    pub context_limit: u64,
    pub max_output_tokens: Option<u32>,
    #[serde(skip)]
    pub base_url: Option<String>,
    #[serde(skip)]
    pub api_key_env: Option<String>,
}

impl BackendProfile {
    /// Build a profile from a settings entry. Local backends are always free.
    #[must_use]
    pub fn from_entry(entry: &BackendEntry) -> Self {
        let cost = match entry.tier {
            Tier::Local => CostModel::FREE,
            Tier::Cloud => CostModel {
                input_per_1k: entry.input_rate,
                output_per_1k: entry.output_rate,
            },
        };
        Self {
            id: entry.id.clone(),
            tier: entry.tier,
            provider: entry.provider.clone(),
            model: entry.model.clone(),
            supports_structured_output: entry.structured_output,
            cost,
            context_limit: entry.context_limit,
            max_output_tokens: entry.max_output_tokens,
            base_url: entry.base_url.clone(),
            api_key_env: entry.api_key_env.clone(),
        }
    }
}

/// Catalog of backends, in declaration order
#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    profiles: Vec<BackendProfile>,
    index: HashMap<String, usize>,
}

impl BackendRegistry {
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` on duplicate ids.
    pub fn from_profiles(profiles: Vec<BackendProfile>) -> Result<Self, ConfigError> {
        let mut index = HashMap::with_capacity(profiles.len());
        let mut errors = Vec::new();
        for (i, profile) in profiles.iter().enumerate() {
            if index.insert(profile.id.clone(), i).is_some() {
                errors.push(format!("backends: duplicate id '{}'", profile.id));
            }
        }
        if !errors.is_empty() {
            return Err(ConfigError::validation(errors));
        }
        Ok(Self { profiles, index })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        Self::from_profiles(
            settings
                .backends
                .iter()
                .map(BackendProfile::from_entry)
                .collect(),
        )
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&BackendProfile> {
        self.index.get(id).map(|&i| &self.profiles[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &BackendProfile> {
        self.profiles.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
