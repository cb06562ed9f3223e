//! In-memory registry backend.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::RegistryError;

use super::store::{sort_instances, AddonRegistry, RegistryResult};
use super::types::{AddonIdentity, AddonInstance, PartialIdentity};

/// Registry that keeps records for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryAddonRegistry {
    records: RwLock<HashMap<AddonIdentity, AddonInstance>>,
}

impl MemoryAddonRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns true if no records are stored.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl AddonRegistry for MemoryAddonRegistry {
    async fn exists(&self, identity: &AddonIdentity) -> RegistryResult<bool> {
        Ok(self.records.read().await.contains_key(identity))
    }

    async fn store(&self, instance: &AddonInstance) -> RegistryResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&instance.identity) {
            return Err(RegistryError::Conflict {
                identity: instance.identity.to_string(),
            });
        }
        debug!("Storing record {}", instance.identity);
        records.insert(instance.identity.clone(), instance.clone());
        Ok(())
    }

    async fn get(&self, identity: &AddonIdentity) -> RegistryResult<AddonInstance> {
        self.records
            .read()
            .await
            .get(identity)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                identity: identity.to_string(),
            })
    }

    async fn update(&self, instance: &AddonInstance) -> RegistryResult<()> {
        let mut records = self.records.write().await;
        let Some(existing) = records.get_mut(&instance.identity) else {
            return Err(RegistryError::NotFound {
                identity: instance.identity.to_string(),
            });
        };
        *existing = instance.clone();
        Ok(())
    }

    async fn delete(&self, identity: &AddonIdentity) -> RegistryResult<()> {
        self.records
            .write()
            .await
            .remove(identity)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotFound {
                identity: identity.to_string(),
            })
    }

    async fn list(&self, filter: &PartialIdentity) -> RegistryResult<Vec<AddonInstance>> {
        let mut instances: Vec<AddonInstance> = self
            .records
            .read()
            .await
            .values()
            .filter(|i| filter.matches(&i.identity))
            .cloned()
            .collect();
        sort_instances(&mut instances);
        Ok(instances)
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::test_support::instance;
    use crate::registry::AddonType;

    #[tokio::test]
    async fn test_store_is_unique() {
        let registry = MemoryAddonRegistry::new();
        let record = instance(AddonType::Redis, "cache");

        registry.store(&record).await.expect("store");
        let again = registry.store(&record).await;
        assert!(matches!(again, Err(RegistryError::Conflict { .. })));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_and_delete_require_existing() {
        let registry = MemoryAddonRegistry::new();
        let record = instance(AddonType::Redis, "cache");

        assert!(matches!(registry.update(&record).await, Err(RegistryError::NotFound { .. })));
        assert!(matches!(
            registry.delete(&record.identity).await,
            Err(RegistryError::NotFound { .. })
        ));

        registry.store(&record).await.expect("store");
        registry.delete(&record.identity).await.expect("delete");
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_list_excluding_type() {
        let registry = MemoryAddonRegistry::new();
        registry.store(&instance(AddonType::Redis, "cache")).await.expect("store");
        registry.store(&instance(AddonType::AtomApp, "web")).await.expect("store");
        registry.store(&instance(AddonType::AtomApp, "api")).await.expect("store");

        let scope = PartialIdentity::new("dev", "shop");
        let apps = registry.list(&scope.clone().with_type(AddonType::AtomApp)).await.expect("list");
        assert_eq!(apps.len(), 2);
        assert_eq!(apps[0].identity.name, "api");

        let others = registry
            .list_excluding_type(&scope, AddonType::AtomApp)
            .await
            .expect("list");
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].identity.addon_type, AddonType::Redis);
    }
}
