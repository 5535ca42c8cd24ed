use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{Interpreter, Loader};
use crate::error::LoadError;

/// A loadable engine module, addressed by name.
#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    async fn instantiate(&self) -> Result<Box<dyn Interpreter>>;
}

/// Describes a registered module for listings.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleDescription {
    pub name: String,
    pub description: String,
}

/// Holds all known modules. RwLock allows runtime registration.
pub struct ModuleRegistry {
    modules: RwLock<HashMap<String, Arc<dyn Module>>>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            modules: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, module: Arc<dyn Module>) {
        let name = module.name().to_string();
        debug!(module = %name, "registered engine module");
        self.modules.write().await.insert(name, module);
    }

    pub async fn unregister(&self, name: &str) {
        self.modules.write().await.remove(name);
    }

    /// Registered modules, sorted by name.
    pub async fn descriptions(&self) -> Vec<ModuleDescription> {
        let mut out: Vec<_> = self
            .modules
            .read()
            .await
            .values()
            .map(|m| ModuleDescription {
                name: m.name().to_string(),
                description: m.description().to_string(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

#[async_trait]
impl Loader for ModuleRegistry {
    async fn load(&self, module_ref: &str) -> Result<Box<dyn Interpreter>, LoadError> {
        // Clone out so the lock is not held across instantiation.
        let module = self
            .modules
            .read()
            .await
            .get(module_ref)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(module_ref.to_string()))?;

        info!(module = %module_ref, "instantiating engine module");
        module.instantiate().await.map_err(|e| LoadError::Init {
            module: module_ref.to_string(),
            reason: format!("{e:#}"),
        })
    }
}
