//! Static registry mapping module ids to live provider instances.
//!
//! The factory set is fixed at construction; instances are built on first
//! resolve and live for the process lifetime so every request observes the
//! same in-memory module (and thus the same token after a refresh).

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::module::antena_play::AntenaPlay;
use crate::module::digi24::Digi24;
use crate::module::{antena_play, digi24, ModuleContext, ModuleError, ProviderModule};

type Factory = Arc<dyn Fn(ModuleContext) -> Arc<dyn ProviderModule> + Send + Sync>;

pub struct ModuleRegistry {
    ctx: ModuleContext,
    factories: HashMap<String, Factory>,
    instances: DashMap<String, Arc<dyn ProviderModule>>,
}

impl ModuleRegistry {
    /// Registry with the built-in provider set.
    pub fn new(ctx: ModuleContext) -> Self {
        Self::empty(ctx)
            .with_factory(antena_play::MODULE_ID, |ctx| Arc::new(AntenaPlay::new(ctx)))
            .with_factory(digi24::MODULE_ID, |ctx| Arc::new(Digi24::new(ctx)))
    }

    /// Registry with no providers; tests add stubs via [`with_factory`].
    ///
    /// [`with_factory`]: ModuleRegistry::with_factory
    pub fn empty(ctx: ModuleContext) -> Self {
        Self {
            ctx,
            factories: HashMap::new(),
            instances: DashMap::new(),
        }
    }

    pub fn with_factory(
        mut self,
        id: impl Into<String>,
        factory: impl Fn(ModuleContext) -> Arc<dyn ProviderModule> + Send + Sync + 'static,
    ) -> Self {
        self.factories.insert(id.into(), Arc::new(factory));
        self
    }

    /// Resolves `module_id` to its singleton instance, constructing it on
    /// first access. Concurrent first resolves construct exactly once: the
    /// dashmap entry guard serializes construction per key, and module
    /// construction is cheap and network-free by contract.
    pub fn resolve(&self, module_id: &str) -> Result<Arc<dyn ProviderModule>, ModuleError> {
        let factory = self
            .factories
            .get(module_id)
            .cloned()
            .ok_or_else(|| ModuleError::UnknownModule(module_id.to_string()))?;

        let instance = self
            .instances
            .entry(module_id.to_string())
            .or_insert_with(|| factory(self.ctx.clone()));
        Ok(Arc::clone(instance.value()))
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.factories.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn context(&self) -> &ModuleContext {
        &self.ctx
    }
}
