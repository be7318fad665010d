use phaseline_utils::{ConfigError, Tier};
use std::collections::HashSet;

use crate::model::Settings;

const KNOWN_PROVIDERS: &[&str] = &["anthropic", "openrouter", "ollama", "scripted"];

impl Settings {
    /// Check every cross-reference and numeric bound, collecting all problems.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` listing every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.run.max_attempts == 0 {
            errors.push("defaults.max_attempts must be at least 1".to_string());
        }
        if self.run.max_in_flight == 0 {
            errors.push("defaults.max_in_flight must be at least 1".to_string());
        }
        if self.run.backoff_base > self.run.backoff_max {
            errors.push("defaults.backoff_base_ms must not exceed backoff_max_ms".to_string());
        }

        let threshold = self.budget.alert_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            errors.push(format!(
                "budget.alert_threshold must be in (0, 1], got {threshold}"
            ));
        }
        if self.budget.window_hours == 0 {
            errors.push("budget.window_hours must be at least 1".to_string());
        }

        let mut ids = HashSet::new();
        for backend in &self.backends {
            if backend.id.trim().is_empty() {
                errors.push("backends: id must not be empty".to_string());
            }
            if !ids.insert(backend.id.as_str()) {
                errors.push(format!("backends: duplicate id '{}'", backend.id));
            }
            if !KNOWN_PROVIDERS.contains(&backend.provider.as_str()) {
                errors.push(format!(
                    "backends.{}: unknown provider '{}' (expected one of {})",
                    backend.id,
                    backend.provider,
                    KNOWN_PROVIDERS.join(", ")
                ));
            }
            if backend.context_limit == 0 {
                errors.push(format!("backends.{}: context_limit must be > 0", backend.id));
            }
            for (name, rate) in [
                ("input_rate", backend.input_rate),
                ("output_rate", backend.output_rate),
            ] {
                if !rate.is_finite() || rate < 0.0 {
                    errors.push(format!("backends.{}: {name} must be >= 0", backend.id));
                } else if backend.tier == Tier::Local && rate > 0.0 {
                    errors.push(format!(
                        "backends.{}: local backends must have zero {name}",
                        backend.id
                    ));
                }
            }
        }

        let mut check_ref = |context: &str, id: &str| {
            if !ids.contains(id) {
                errors.push(format!("{context}: unknown backend '{id}'"));
            }
        };
        if let Some(best_effort) = &self.routing.best_effort {
            check_ref("routing.best_effort", best_effort);
        }
        for id in &self.routing.default {
            check_ref("routing.default", id);
        }
        for (i, rule) in self.routing.rules.iter().enumerate() {
            let context = format!("routing.rules[{i}]");
            for id in &rule.prefer {
                check_ref(&context, id);
            }
        }

        if self.routing.attempts_per_backend == 0 {
            errors.push("routing.attempts_per_backend must be at least 1".to_string());
        }
        for (i, rule) in self.routing.rules.iter().enumerate() {
            if rule.prefer.is_empty() {
                errors.push(format!("routing.rules[{i}]: prefer must not be empty"));
            }
            if rule.attempts_per_backend == Some(0) {
                errors.push(format!(
                    "routing.rules[{i}]: attempts_per_backend must be at least 1"
                ));
            }
        }

        for path in &self.extraction.protected_paths {
            if path.trim().is_empty() {
                errors.push("extraction.protected_paths: empty entry".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::validation(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BackendEntry, RoutingRuleEntry};

    fn backend(id: &str, tier: Tier, rate: f64) -> BackendEntry {
        BackendEntry {
            id: id.to_string(),
            tier,
            provider: "scripted".to_string(),
            model: String::new(),
            structured_output: false,
            context_limit: 1000,
            input_rate: rate,
            output_rate: rate,
            base_url: None,
            api_key_env: None,
            max_output_tokens: None,
        }
    }

    #[test]
    fn test_default_settings_validate() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn test_collects_every_problem() {
        let mut settings = Settings::default();
        settings.backends = vec![
            backend("a", Tier::Local, 0.5),
            backend("a", Tier::Cloud, 1.0),
        ];
        settings.routing.default = vec!["a".to_string(), "ghost".to_string()];
        settings.routing.rules = vec![RoutingRuleEntry {
            complexity: None,
            task_type: None,
            prefer: vec![],
            attempts_per_backend: Some(0),
        }];
        settings.budget.alert_threshold = 1.5;

        let Err(ConfigError::ValidationFailed { errors, error_count }) = settings.validate()
        else {
            panic!("expected validation failure");
        };

        assert_eq!(errors.len(), error_count);
        let joined = errors.join("\n");
        assert!(joined.contains("duplicate id 'a'"));
        assert!(joined.contains("local backends must have zero input_rate"));
        assert!(joined.contains("unknown backend 'ghost'"));
        assert!(joined.contains("prefer must not be empty"));
        assert!(joined.contains("alert_threshold"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut settings = Settings::default();
        let mut entry = backend("x", Tier::Cloud, 0.1);
        entry.provider = "carrier-pigeon".to_string();
        settings.backends = vec![entry];
        settings.routing.default = vec!["x".to_string()];
        settings.routing.rules.clear();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("carrier-pigeon"));
    }
}
