//! Immutable set of job definitions keyed by code.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SchedulerError;
use crate::job::JobDefinition;

/// Job definitions in registration order.
#[derive(Debug, Default)]
pub struct JobRegistry {
    order: Vec<String>,
    jobs: HashMap<String, Arc<JobDefinition>>,
}

impl JobRegistry {
    /// Build a registry. Duplicate codes are rejected.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = JobDefinition>,
    ) -> Result<Self, SchedulerError> {
        let mut registry = Self::default();
        for def in definitions {
            if registry.jobs.contains_key(&def.code) {
                return Err(SchedulerError::DuplicateJob(def.code));
            }
            registry.order.push(def.code.clone());
            registry.jobs.insert(def.code.clone(), Arc::new(def));
        }
        Ok(registry)
    }

    pub fn get(&self, code: &str) -> Option<Arc<JobDefinition>> {
        self.jobs.get(code).cloned()
    }

    /// Definitions in registration order.
    pub fn definitions(&self) -> Vec<Arc<JobDefinition>> {
        self.order
            .iter()
            .filter_map(|code| self.jobs.get(code).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
