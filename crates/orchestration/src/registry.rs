//! Name-to-handler tables.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::LocalBoxFuture;
use serde_json::Value;

use crate::context::OrchestrationContext;
use crate::error::{OrchestratorError, RegistryError};

/// An orchestrator function.
///
/// The returned future is driven by the replay engine on the calling thread
/// and does not need to be `Send`.
pub trait OrchestrationHandler: Send + Sync {
    fn invoke(
        &self,
        ctx: OrchestrationContext,
        input: Value,
    ) -> LocalBoxFuture<'static, Result<Value, OrchestratorError>>;
}

/// Adapts a closure into an `OrchestrationHandler`.
pub struct FnOrchestration<F>(pub F);

impl<F, Fut> OrchestrationHandler for FnOrchestration<F>
where
    F: Fn(OrchestrationContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, OrchestratorError>> + 'static,
{
    fn invoke(
        &self,
        ctx: OrchestrationContext,
        input: Value,
    ) -> LocalBoxFuture<'static, Result<Value, OrchestratorError>> {
        Box::pin((self.0)(ctx, input))
    }
}

/// Immutable table of handlers keyed by name.
pub struct Registry<H: ?Sized> {
    handlers: Arc<HashMap<String, Arc<H>>>,
}

impl<H: ?Sized> Clone for Registry<H> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

impl<H: ?Sized> Default for Registry<H> {
    fn default() -> Self {
        Self {
            handlers: Arc::new(HashMap::new()),
        }
    }
}

impl<H: ?Sized> Registry<H> {
    pub fn builder() -> RegistryBuilder<H> {
        RegistryBuilder {
            handlers: HashMap::new(),
            duplicates: Vec::new(),
        }
    }

    /// Looks up a handler by name.
    pub fn get(&self, name: &str) -> Option<Arc<H>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Returns the registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Collects registrations; duplicates are reported by `build`.
pub struct RegistryBuilder<H: ?Sized> {
    handlers: HashMap<String, Arc<H>>,
    duplicates: Vec<String>,
}

impl<H: ?Sized> RegistryBuilder<H> {
    /// Registers a handler under `name`.
    pub fn register(mut self, name: impl Into<String>, handler: Arc<H>) -> Self {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            tracing::warn!(%name, "duplicate registration");
            self.duplicates.push(name);
            return self;
        }
        self.handlers.insert(name, handler);
        self
    }

    /// Returns true if `name` is already registered.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn build(self) -> Result<Registry<H>, RegistryError> {
        if !self.duplicates.is_empty() {
            return Err(RegistryError::Duplicate(self.duplicates));
        }
        Ok(Registry {
            handlers: Arc::new(self.handlers),
        })
    }
}

/// Orchestrators keyed by name.
pub type OrchestrationRegistry = Registry<dyn OrchestrationHandler>;

impl RegistryBuilder<dyn OrchestrationHandler> {
    /// Registers a closure as an orchestrator.
    pub fn register_fn<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(OrchestrationContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, OrchestratorError>> + 'static,
    {
        self.register(name, Arc::new(FnOrchestration(f)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(names: &[&str]) -> Result<OrchestrationRegistry, RegistryError> {
        names
            .iter()
            .fold(OrchestrationRegistry::builder(), |builder, name| {
                builder.register_fn(*name, |_ctx: OrchestrationContext, input: Value| async move {
                    Ok::<_, OrchestratorError>(input)
                })
            })
            .build()
    }

    #[test]
    fn lookup_by_name() {
        let registry = registry_with(&["OrderProcessing", "Other"]).unwrap();

        assert!(registry.get("OrderProcessing").is_some());
        assert!(registry.get("Missing").is_none());
        assert!(registry.contains("Other"));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["OrderProcessing", "Other"]);
    }

    #[test]
    fn duplicates_fail_the_build() {
        let result = registry_with(&["A", "B", "A"]);

        assert_eq!(result.err(), Some(RegistryError::Duplicate(vec!["A".to_string()])));
    }

    #[test]
    fn empty_registry() {
        let registry = OrchestrationRegistry::default();
        assert!(registry.is_empty());
        assert!(registry.names().is_empty());
    }
}
