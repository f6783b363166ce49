//! Validator registry keyed by model family

use crate::{FileShapeValidator, GraphConfig, GraphLoadValidator, ModelValidator};
use modelcheck_core::{Error, ModelFamily, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Lookup table from model family to its validator
///
/// Adding a family means registering one more [`ModelValidator`]; callers only
/// ever go through [`resolve`](Self::resolve).
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    validators: HashMap<ModelFamily, Arc<dyn ModelValidator>>,
}

impl ValidatorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            validators: HashMap::new(),
        }
    }

    /// Registry with the built-in graph-runtime and static-file validators
    pub fn with_defaults(graph: GraphConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GraphLoadValidator::new(graph)));
        registry.register(Arc::new(FileShapeValidator::new()));

        info!("Initialized {} validators", registry.count());
        registry
    }

    /// Register a validator under the family it reports
    ///
    /// Returns the validator previously registered for that family, if any.
    pub fn register(&mut self, validator: Arc<dyn ModelValidator>) -> Option<Arc<dyn ModelValidator>> {
        let family = validator.family();
        info!("Registering validator '{}' for {}", validator.name(), family);
        self.validators.insert(family, validator)
    }

    /// Get the validator for `family`
    pub fn get(&self, family: &ModelFamily) -> Option<Arc<dyn ModelValidator>> {
        self.validators.get(family).cloned()
    }

    /// Get the validator for `family` or an unsupported-family error
    pub fn resolve(&self, family: &ModelFamily) -> Result<Arc<dyn ModelValidator>> {
        self.get(family)
            .ok_or_else(|| Error::UnsupportedFamily(family.to_string()))
    }

    /// Get the number of registered validators
    pub fn count(&self) -> usize {
        self.validators.len()
    }

    /// Registered families, sorted by name
    pub fn families(&self) -> Vec<ModelFamily> {
        let mut families: Vec<ModelFamily> = self.validators.keys().cloned().collect();
        families.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        families
    }
}
