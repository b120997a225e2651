//! Saga registry: append-only at startup, read-only thereafter.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{DefinitionError, Result};
use crate::saga::SagaDefinition;

/// Holds every registered saga definition.
///
/// Definitions are registered during startup and only read afterwards;
/// lookups hand out shared `Arc`s so the engine never clones the graph.
#[derive(Debug, Default)]
pub struct SagaRegistry {
    sagas: RwLock<HashMap<String, Arc<SagaDefinition>>>,
}

impl SagaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition. Duplicate names are rejected.
    pub fn register(&self, definition: SagaDefinition) -> Result<()> {
        let mut sagas = self.sagas.write().unwrap();
        if sagas.contains_key(&definition.name) {
            return Err(DefinitionError::DuplicateSaga(definition.name));
        }
        sagas.insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    /// Looks up a definition by name.
    pub fn get(&self, name: &str) -> Option<Arc<SagaDefinition>> {
        self.sagas.read().unwrap().get(name).cloned()
    }

    /// Returns the registered saga names.
    pub fn names(&self) -> Vec<String> {
        self.sagas.read().unwrap().keys().cloned().collect()
    }

    /// Number of registered sagas.
    pub fn len(&self) -> usize {
        self.sagas.read().unwrap().len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.sagas.read().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepDefinition;

    fn saga(name: &str) -> SagaDefinition {
        SagaDefinition::builder(name, "Handler")
            .step(StepDefinition::builder("a", "a_action").build())
            .build()
            .unwrap()
    }

    #[test]
    fn register_and_get() {
        let registry = SagaRegistry::new();
        assert!(registry.is_empty());

        registry.register(saga("order")).unwrap();
        assert_eq!(registry.len(), 1);

        let def = registry.get("order").unwrap();
        assert_eq!(def.name, "order");
        assert!(registry.get("ghost").is_none());
    }

    #[test]
    fn get_returns_shared_definition() {
        let registry = SagaRegistry::new();
        registry.register(saga("order")).unwrap();

        let a = registry.get("order").unwrap();
        let b = registry.get("order").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn rejects_duplicate_registration() {
        let registry = SagaRegistry::new();
        registry.register(saga("order")).unwrap();

        let err = registry.register(saga("order")).unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateSaga(name) if name == "order"));
    }

    #[test]
    fn names_lists_registered_sagas() {
        let registry = SagaRegistry::new();
        registry.register(saga("order")).unwrap();
        registry.register(saga("refund")).unwrap();

        let mut names = registry.names();
        names.sort();
        assert_eq!(names, vec!["order".to_string(), "refund".to_string()]);
    }
}
