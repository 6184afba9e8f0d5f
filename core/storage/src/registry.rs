//! Store registry for resolving a destination backend by name.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crmsync_common::env::{self, var_or};
use crmsync_common::{Error, Result};

use crate::store::DestinationStore;

/// Factory function type for creating stores.
pub type StoreFactory = Box<dyn Fn(Value) -> Result<Arc<dyn DestinationStore>> + Send + Sync>;

/// Registry for destination store factories.
pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a store factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: StoreFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::InvalidInput(format!(
                "Store '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a store by name and configuration.
    ///
    /// # Errors
    /// - Store not registered
    /// - Configuration invalid for the store
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn DestinationStore>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Store '{}' is not registered", name)))?;
        factory(config)
    }

    /// Names of registered stores.
    pub fn stores(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in stores.
pub fn create_default_registry() -> StoreRegistry {
    let mut registry = StoreRegistry::new();

    registry.factories.insert(
        "memory".to_string(),
        Box::new(|_config| -> Result<Arc<dyn DestinationStore>> {
            Ok(Arc::new(crate::memory::MemoryStore::new()))
        }),
    );

    registry.factories.insert(
        "sqlite".to_string(),
        Box::new(|config| -> Result<Arc<dyn DestinationStore>> {
            let path = config
                .get("path")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::Config("SQLite store requires 'path'".to_string()))?;
            Ok(Arc::new(crate::sqlite::SqliteStore::open(path)?))
        }),
    );

    registry
}

/// Which store to open, read from `SYNC_STORE` and `SYNC_DATABASE_PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub backend: String,
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env::process_env)
    }

    pub fn from_lookup<L>(lookup: L) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let backend = var_or(&lookup, "SYNC_STORE", "sqlite").to_ascii_lowercase();
        let path = lookup("SYNC_DATABASE_PATH")
            .map(|p| PathBuf::from(p.trim()))
            .filter(|p| !p.as_os_str().is_empty())
            .or_else(crate::sqlite::SqliteStore::default_path);

        if backend == "sqlite" && path.is_none() {
            return Err(Error::Config(
                "SYNC_DATABASE_PATH is not set and no data directory is available".to_string(),
            ));
        }

        Ok(Self { backend, path })
    }

    /// Factory configuration passed to the registry.
    pub fn factory_config(&self) -> Value {
        match &self.path {
            Some(path) => json!({ "path": path.to_string_lossy() }),
            None => Value::Null,
        }
    }

    /// Open the configured store through the default registry.
    pub fn open(&self) -> Result<Arc<dyn DestinationStore>> {
        create_default_registry().resolve(&self.backend, self.factory_config())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = StoreRegistry::new();
        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryStore::new()))))
            .unwrap();

        let store = registry.resolve("test", Value::Null).unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = create_default_registry();
        let result = registry.register("memory", Box::new(|_| Ok(Arc::new(MemoryStore::new()))));
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = create_default_registry();
        assert!(matches!(
            registry.resolve("postgres", Value::Null),
            Err(Error::NotFound(_))
        ));
        assert_eq!(registry.stores(), vec!["memory", "sqlite"]);
    }

    #[test]
    fn test_sqlite_requires_path() {
        let registry = create_default_registry();
        assert!(matches!(
            registry.resolve("sqlite", Value::Null),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_store_config_from_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("sync.db");
        let db_str = db.to_string_lossy().to_string();

        let config = StoreConfig::from_lookup(|k| match k {
            "SYNC_STORE" => Some("SQLite".to_string()),
            "SYNC_DATABASE_PATH" => Some(db_str.clone()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.backend, "sqlite");
        assert_eq!(config.path.as_deref(), Some(db.as_path()));
        let store = config.open().unwrap();
        assert_eq!(store.name(), "sqlite");
    }

    #[test]
    fn test_memory_store_config() {
        let config = StoreConfig::from_lookup(|k| (k == "SYNC_STORE").then(|| "memory".to_string()))
            .unwrap();
        assert_eq!(config.open().unwrap().name(), "memory");
    }
}
