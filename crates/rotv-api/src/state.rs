use std::collections::HashMap;
use std::sync::Arc;

use rotv_core::{AuthStore, Cache, GatewayConfig, ModuleContext, ModuleRegistry, ProxyEngine};

/// Default username/password for a module, taken from the config file and
/// used when a login request body carries no credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ModuleRegistry>,
    pub cache: Arc<Cache>,
    pub auth: Arc<AuthStore>,
    pub engine: Arc<ProxyEngine>,
    pub credentials: Arc<HashMap<String, Credentials>>,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_registry(ModuleRegistry::new(ModuleContext::new(config)))
    }

    /// Builds state around an existing registry; cache, auth store and
    /// proxy engine are shared with the registry's context so handlers and
    /// modules observe the same entries.
    pub fn with_registry(registry: ModuleRegistry) -> Self {
        let ctx = registry.context();
        Self {
            cache: Arc::clone(&ctx.cache),
            auth: Arc::clone(&ctx.auth),
            engine: Arc::new(ProxyEngine::new(ctx.client.clone())),
            credentials: Arc::new(HashMap::new()),
            registry: Arc::new(registry),
        }
    }

    pub fn with_credentials(mut self, credentials: HashMap<String, Credentials>) -> Self {
        self.credentials = Arc::new(credentials);
        self
    }
}
