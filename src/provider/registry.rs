use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use toml::Table;
use tracing::{debug, info};

use super::{
    EarthData, Element84, PlanetaryComputer, Provider, ProviderKey, RadiantMlHub, StacProvider,
};
use crate::error::ProviderError;

/// Builds a provider from its config kwargs.
pub type Constructor =
    Arc<dyn Fn(&Table) -> Result<Arc<dyn Provider>, ProviderError> + Send + Sync>;

/// Maps each [`ProviderKey`] to the constructor that builds it.
pub struct ProviderRegistry {
    constructors: HashMap<ProviderKey, Constructor>,
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, key: ProviderKey, constructor: F)
    where
        F: Fn(&Table) -> Result<Arc<dyn Provider>, ProviderError> + Send + Sync + 'static,
    {
        self.constructors.insert(key, Arc::new(constructor));
    }

    pub fn construct(
        &self,
        key: ProviderKey,
        kwargs: &Table,
    ) -> Result<Arc<dyn Provider>, ProviderError> {
        let constructor = self
            .constructors
            .get(&key)
            .ok_or(ProviderError::Unregistered(key.to_string()))?;
        constructor(kwargs)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(ProviderKey::Mpc, |kwargs| {
            Ok(Arc::new(PlanetaryComputer::from_kwargs(kwargs)?) as Arc<dyn Provider>)
        });
        registry.register(ProviderKey::Earthdata, |kwargs| {
            Ok(Arc::new(EarthData::from_kwargs(kwargs)?) as Arc<dyn Provider>)
        });
        registry.register(ProviderKey::Element84, |kwargs| {
            Ok(Arc::new(Element84::from_kwargs(kwargs)?) as Arc<dyn Provider>)
        });
        registry.register(ProviderKey::Radiant, |kwargs| {
            Ok(Arc::new(RadiantMlHub::from_kwargs(kwargs)?) as Arc<dyn Provider>)
        });
        registry.register(ProviderKey::Stac, |kwargs| {
            Ok(Arc::new(StacProvider::from_kwargs(kwargs)?) as Arc<dyn Provider>)
        });
        registry
    }
}

/// Stable digest of provider kwargs; empty when there are none.
pub fn kwargs_hash(kwargs: &Table) -> String {
    if kwargs.is_empty() {
        return String::new();
    }
    let canonical = toml::to_string(kwargs).unwrap_or_default();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Identifies one provider instance: its key plus a digest of its kwargs.
pub fn instance_id(key: ProviderKey, kwargs: &Table) -> String {
    format!("{key}_{}", kwargs_hash(kwargs))
}

/// Provider instances built so far, one per (key, kwargs). Authorization is
/// checked once, when an instance is first built.
pub struct ProviderStore {
    registry: ProviderRegistry,
    instances: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderStore {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry,
            instances: HashMap::new(),
        }
    }

    pub async fn get(
        &mut self,
        key: ProviderKey,
        kwargs: &Table,
    ) -> Result<Arc<dyn Provider>, ProviderError> {
        let id = instance_id(key, kwargs);
        if let Some(provider) = self.instances.get(&id) {
            debug!(provider = %provider.description(), "reusing provider");
            return Ok(provider.clone());
        }

        let provider = self.registry.construct(key, kwargs)?;
        let authorized = provider.check_authorization().await.map_err(|e| {
            ProviderError::Misconfigured(provider.description().to_string(), e.to_string())
        })?;
        if !authorized {
            return Err(ProviderError::Unauthorized(provider.description().to_string()));
        }
        info!("Initialized provider {}", provider.description());
        self.instances.insert(id, provider.clone());
        Ok(provider)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl Default for ProviderStore {
    fn default() -> Self {
        Self::new(ProviderRegistry::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogItem, SearchQuery};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counted {
        name: String,
        authorized: bool,
        checks: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Provider for Counted {
        fn description(&self) -> &str {
            &self.name
        }

        async fn check_authorization(&self) -> Result<bool> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            Ok(self.authorized)
        }

        async fn search(&self, _query: &SearchQuery) -> Result<Vec<CatalogItem>> {
            Ok(vec![])
        }
    }

    fn store(authorized: bool, checks: Arc<AtomicUsize>) -> ProviderStore {
        let mut registry = ProviderRegistry::empty();
        registry.register(ProviderKey::Stac, move |kwargs| {
            let name = kwargs
                .get("client_url")
                .and_then(|v| v.as_str())
                .unwrap_or("counted")
                .to_string();
            Ok(Arc::new(Counted {
                name,
                authorized,
                checks: checks.clone(),
            }) as Arc<dyn Provider>)
        });
        ProviderStore::new(registry)
    }

    #[test]
    fn test_kwargs_hash() {
        assert_eq!(kwargs_hash(&Table::new()), "");
        let mut a = Table::new();
        a.insert("subprovider_id".into(), "LPCLOUD".into());
        let mut b = Table::new();
        b.insert("subprovider_id".into(), "ASF".into());
        assert_eq!(kwargs_hash(&a).len(), 64);
        assert_eq!(kwargs_hash(&a), kwargs_hash(&a.clone()));
        assert_ne!(kwargs_hash(&a), kwargs_hash(&b));
    }

    #[test]
    fn test_instance_id() {
        let mut kwargs = Table::new();
        assert_eq!(instance_id(ProviderKey::Mpc, &kwargs), "MPC_");
        kwargs.insert("client_url".into(), "https://a.example.com".into());
        let a = instance_id(ProviderKey::Stac, &kwargs);
        kwargs.insert("client_url".into(), "https://b.example.com".into());
        let b = instance_id(ProviderKey::Stac, &kwargs);
        assert!(a.starts_with("STAC_"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_store_memoizes_instances() {
        let checks = Arc::new(AtomicUsize::new(0));
        let mut store = store(true, checks.clone());
        let mut kwargs = Table::new();
        kwargs.insert("client_url".into(), "https://a.example.com".into());

        let first = store.get(ProviderKey::Stac, &kwargs).await.unwrap();
        let second = store.get(ProviderKey::Stac, &kwargs).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(checks.load(Ordering::SeqCst), 1);

        kwargs.insert("client_url".into(), "https://b.example.com".into());
        let third = store.get(ProviderKey::Stac, &kwargs).await.unwrap();
        assert_eq!(third.description(), "https://b.example.com");
        assert_eq!(store.len(), 2);
        assert_eq!(checks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unauthorized_provider() {
        let mut store = store(false, Arc::new(AtomicUsize::new(0)));
        let result = store.get(ProviderKey::Stac, &Table::new()).await;
        assert!(matches!(result, Err(ProviderError::Unauthorized(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_provider() {
        let mut store = ProviderStore::new(ProviderRegistry::empty());
        let result = store.get(ProviderKey::Mpc, &Table::new()).await;
        assert!(matches!(result, Err(ProviderError::Unregistered(key)) if key == "MPC"));
    }

    #[test]
    fn test_default_registry_builds_builtins() {
        let registry = ProviderRegistry::default();
        let provider = registry.construct(ProviderKey::Element84, &Table::new()).unwrap();
        assert_eq!(provider.description(), "Element 84 Earth Search (ELEMENT84)");
        let provider = registry.construct(ProviderKey::Radiant, &Table::new()).unwrap();
        assert_eq!(provider.description(), "Radiant ML Hub (RADIANT)");
        assert!(matches!(
            registry.construct(ProviderKey::Stac, &Table::new()),
            Err(ProviderError::Misconfigured(..))
        ));
    }
}
