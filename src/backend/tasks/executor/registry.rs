//! Executor lookup.
//!
//! Executors are registered once at startup. The first executor registered
//! for a task type becomes that type's default; any executor can also be
//! addressed by provider name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{Executor, ExecutorError, HttpExecutor};
use crate::shared::config::ProviderConfig;
use crate::shared::task::TaskType;

#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    by_provider: HashMap<String, Arc<dyn Executor>>,
    by_type: HashMap<TaskType, Arc<dyn Executor>>,
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut providers: Vec<&String> = self.by_provider.keys().collect();
        providers.sort();
        f.debug_struct("ExecutorRegistry")
            .field("providers", &providers)
            .finish()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build HTTP executors for every configured provider
    pub fn from_config(providers: &[ProviderConfig]) -> Result<Self, ExecutorError> {
        let mut registry = Self::new();
        for provider in providers {
            let executor = HttpExecutor::new(
                provider.name.clone(),
                provider.base_url.clone(),
                provider.api_key.clone(),
                provider.mode,
                provider.task_types.clone(),
                Duration::from_secs(provider.request_timeout_secs),
            )?;
            tracing::info!(
                "[Executor] Registered provider '{}' ({}) for {:?}",
                provider.name,
                provider.mode,
                provider.task_types
            );
            registry.register(Arc::new(executor));
        }
        Ok(registry)
    }

    pub fn register(&mut self, executor: Arc<dyn Executor>) {
        for task_type in executor.task_types() {
            self.by_type
                .entry(*task_type)
                .or_insert_with(|| executor.clone());
        }
        self.by_provider
            .insert(executor.provider().to_string(), executor);
    }

    /// Builder-style `register`
    pub fn with(mut self, executor: Arc<dyn Executor>) -> Self {
        self.register(executor);
        self
    }

    pub fn for_type(&self, task_type: TaskType) -> Option<Arc<dyn Executor>> {
        self.by_type.get(&task_type).cloned()
    }

    pub fn for_provider(&self, provider: &str) -> Option<Arc<dyn Executor>> {
        self.by_provider.get(provider).cloned()
    }

    /// Executor for a task, preferring an explicit provider
    pub fn resolve(&self, task_type: TaskType, provider: Option<&str>) -> Option<Arc<dyn Executor>> {
        match provider {
            Some(name) => self
                .for_provider(name)
                .filter(|executor| executor.task_types().contains(&task_type)),
            None => self.for_type(task_type),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_provider.is_empty()
    }
}
