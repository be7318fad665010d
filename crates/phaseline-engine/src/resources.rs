//! Resource reads backed by the specification store

use phaseline_llm::{CURRENT_SPECIFICATION, ResourceProvider};
use phaseline_store::SpecStore;
use std::sync::Arc;
use tracing::debug;

/// Serves the run's current specification to tool-capable backends
pub struct SpecResources {
    store: Arc<dyn SpecStore>,
    spec_name: String,
}

impl SpecResources {
    #[must_use]
    pub fn new(store: Arc<dyn SpecStore>, spec_name: impl Into<String>) -> Self {
        Self {
            store,
            spec_name: spec_name.into(),
        }
    }
}

impl ResourceProvider for SpecResources {
    fn resource_names(&self) -> Vec<String> {
        vec![CURRENT_SPECIFICATION.to_string()]
    }

    fn read_resource(&self, name: &str) -> Option<String> {
        if name != CURRENT_SPECIFICATION {
            return None;
        }
        match self.store.read(&self.spec_name) {
            Ok(content) => Some(content),
            Err(e) => {
                debug!(spec = %self.spec_name, error = %e, "Specification not readable");
                None
            }
        }
    }
}
