//! Routing policy: classification -> ordered backend preference list

use phaseline_config::{RoutingRuleEntry, RoutingSettings};
use phaseline_utils::{Complexity, TaskType};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingRule {
    pub complexity: Option<Complexity>,
    pub task_type: Option<TaskType>,
    pub prefer: Vec<String>,
    pub attempts_per_backend: Option<u32>,
}

impl RoutingRule {
    #[must_use]
    pub fn new(
        complexity: Option<Complexity>,
        task_type: Option<TaskType>,
        prefer: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            complexity,
            task_type,
            prefer: prefer.into_iter().map(Into::into).collect(),
            attempts_per_backend: None,
        }
    }

    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts_per_backend = Some(attempts);
        self
    }

    /// Match rank for a classification; lower is more specific
    fn rank(&self, complexity: Complexity, task_type: TaskType) -> Option<u8> {
        match (self.complexity, self.task_type) {
            (Some(c), Some(t)) if c == complexity && t == task_type => Some(0),
            (None, Some(t)) if t == task_type => Some(1),
            (Some(c), None) if c == complexity => Some(2),
            (None, None) => Some(3),
            _ => None,
        }
    }
}

impl From<&RoutingRuleEntry> for RoutingRule {
    fn from(entry: &RoutingRuleEntry) -> Self {
        Self {
            complexity: entry.complexity,
            task_type: entry.task_type,
            prefer: entry.prefer.clone(),
            attempts_per_backend: entry.attempts_per_backend,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingPolicy {
    pub rules: Vec<RoutingRule>,
    pub default: Vec<String>,
    /// Tried after every preferred candidate, still subject to filtering
    pub best_effort: Option<String>,
    pub attempts_per_backend: u32,
}

impl RoutingPolicy {
    pub const DEFAULT_ATTEMPTS_PER_BACKEND: u32 = 2;

    #[must_use]
    pub fn new(default: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            rules: Vec::new(),
            default: default.into_iter().map(Into::into).collect(),
            best_effort: None,
            attempts_per_backend: Self::DEFAULT_ATTEMPTS_PER_BACKEND,
        }
    }

    #[must_use]
    pub fn from_settings(settings: &RoutingSettings) -> Self {
        Self {
            rules: settings.rules.iter().map(RoutingRule::from).collect(),
            default: settings.default.clone(),
            best_effort: settings.best_effort.clone(),
            attempts_per_backend: settings.attempts_per_backend,
        }
    }

    #[must_use]
    pub fn with_rule(mut self, rule: RoutingRule) -> Self {
        self.rules.push(rule);
        self
    }

    #[must_use]
    pub fn with_best_effort(mut self, id: impl Into<String>) -> Self {
        self.best_effort = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_attempts_per_backend(mut self, attempts: u32) -> Self {
        self.attempts_per_backend = attempts;
        self
    }

    /// Most specific matching rule; the first declared wins a tie
    #[must_use]
    pub fn rule_for(&self, complexity: Complexity, task_type: TaskType) -> Option<&RoutingRule> {
        self.rules
            .iter()
            .enumerate()
            .filter_map(|(i, rule)| rule.rank(complexity, task_type).map(|rank| (rank, i, rule)))
            .min_by_key(|(rank, i, _)| (*rank, *i))
            .map(|(_, _, rule)| rule)
    }

    #[must_use]
    pub fn preferences(&self, complexity: Complexity, task_type: TaskType) -> &[String] {
        self.rule_for(complexity, task_type)
            .map_or(self.default.as_slice(), |rule| rule.prefer.as_slice())
    }

    /// Failed attempts tolerated on one backend before falling back
    #[must_use]
    pub fn attempts_for(&self, complexity: Complexity, task_type: TaskType) -> u32 {
        self.rule_for(complexity, task_type)
            .and_then(|rule| rule.attempts_per_backend)
            .unwrap_or(self.attempts_per_backend)
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RoutingPolicy {
        RoutingPolicy::new(["default-a"])
            .with_rule(RoutingRule::new(Some(Complexity::High), None, ["by-complexity"]))
            .with_rule(RoutingRule::new(None, Some(TaskType::Testing), ["by-type"]))
            .with_rule(
                RoutingRule::new(Some(Complexity::High), Some(TaskType::Testing), ["exact"])
                    .with_attempts(3),
            )
    }

    #[test]
    fn test_exact_rule_beats_partial_rules() {
        let p = policy();
        assert_eq!(p.preferences(Complexity::High, TaskType::Testing), ["exact"]);
        assert_eq!(p.attempts_for(Complexity::High, TaskType::Testing), 3);
    }

    #[test]
    fn test_type_rule_beats_complexity_rule() {
        let p = policy();
        assert_eq!(p.preferences(Complexity::Low, TaskType::Testing), ["by-type"]);
        assert_eq!(p.preferences(Complexity::High, TaskType::Design), ["by-complexity"]);
    }

    #[test]
    fn test_falls_back_to_default() {
        let p = policy();
        assert_eq!(p.preferences(Complexity::Low, TaskType::Review), ["default-a"]);
        assert_eq!(p.attempts_for(Complexity::Low, TaskType::Review), 2);
    }

    #[test]
    fn test_from_settings_copies_rules() {
        let settings = RoutingSettings {
            best_effort: Some("cheap".into()),
            attempts_per_backend: 5,
            default: vec!["a".into()],
            rules: vec![RoutingRuleEntry {
                complexity: None,
                task_type: Some(TaskType::Review),
                prefer: vec!["b".into()],
                attempts_per_backend: None,
            }],
        };
        let p = RoutingPolicy::from_settings(&settings);
        assert_eq!(p.best_effort.as_deref(), Some("cheap"));
        assert_eq!(p.preferences(Complexity::Medium, TaskType::Review), ["b"]);
        assert_eq!(p.attempts_for(Complexity::Medium, TaskType::Review), 5);
    }
}
