//! Workflow and role catalog (YAML)
//!
//! Roles are prompt-template values: a title, a goal, a backstory and the
//! task type the router classifies them as. A workflow is an ordered list of
//! phases, each naming a role and the phases it depends on.

use phaseline_utils::{ConfigError, TaskType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const BUILTIN_CATALOG: &str = include_str!("default_workflows.yaml");

/// Prompt persona for a phase
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RoleProfile {
    pub title: String,
    pub goal: String,
    #[serde(default)]
    pub backstory: String,
    pub task_type: TaskType,
}

/// One step of a workflow
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseSpec {
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// May run concurrently with other ready phases
    #[serde(default)]
    pub parallel: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowDefinition {
    /// Filled from the catalog key when loaded
    #[serde(skip)]
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub phases: Vec<PhaseSpec>,
}

impl WorkflowDefinition {
    #[must_use]
    pub fn phase(&self, name: &str) -> Option<&PhaseSpec> {
        self.phases.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowCatalog {
    #[serde(default)]
    pub roles: BTreeMap<String, RoleProfile>,
    #[serde(default)]
    pub workflows: BTreeMap<String, WorkflowDefinition>,
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl WorkflowCatalog {
    /// Parse a catalog from YAML text.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidFile` if the YAML is malformed.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let mut catalog: WorkflowCatalog =
            serde_yaml::from_str(content).map_err(|e| ConfigError::InvalidFile {
                path: "<workflows>".to_string(),
                reason: e.to_string(),
            })?;
        for (id, workflow) in &mut catalog.workflows {
            workflow.id = id.clone();
        }
        Ok(catalog)
    }

    /// The catalog compiled into the binary.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_yaml_str(BUILTIN_CATALOG)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut catalog = Self::from_yaml_str(&content).map_err(|e| match e {
            ConfigError::InvalidFile { reason, .. } => ConfigError::InvalidFile {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })?;
        catalog.source = Some(path.to_path_buf());
        Ok(catalog)
    }

    /// Load from `explicit`, else `.phaseline/workflows.yaml` or
    /// `workflows.yaml` under `start_dir`, else the built-in catalog.
    pub fn discover(start_dir: &Path, explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ConfigError::NotFound {
                    path: path.display().to_string(),
                });
            }
            return Self::load(path);
        }
        for candidate in [
            start_dir.join(".phaseline").join("workflows.yaml"),
            start_dir.join("workflows.yaml"),
        ] {
            if candidate.is_file() {
                return Self::load(&candidate);
            }
        }
        Self::builtin()
    }

    /// Look up a workflow by id.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownWorkflow` if no workflow has that id.
    pub fn workflow(&self, id: &str) -> Result<&WorkflowDefinition, ConfigError> {
        self.workflows
            .get(id)
            .ok_or_else(|| ConfigError::UnknownWorkflow(id.to_string()))
    }
}
