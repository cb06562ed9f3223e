//! Registry trait definition.
//!
//! This module defines the common interface for addon instance registries.

use async_trait::async_trait;

use crate::error::RegistryError;

use super::types::{AddonIdentity, AddonInstance, AddonType, PartialIdentity};

/// Result type for registry calls.
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Trait for addon instance registry backends.
///
/// Backends report every I/O failure as [`RegistryError::Unavailable`] so
/// callers can tell a missing record apart from a storage outage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AddonRegistry: Send + Sync {
    /// Returns true if a record with exactly this identity exists.
    async fn exists(&self, identity: &AddonIdentity) -> RegistryResult<bool>;

    /// Stores a new record.
    ///
    /// Fails with [`RegistryError::Conflict`] if the identity is taken.
    async fn store(&self, instance: &AddonInstance) -> RegistryResult<()>;

    /// Loads a record.
    ///
    /// Fails with [`RegistryError::NotFound`] if it does not exist.
    async fn get(&self, identity: &AddonIdentity) -> RegistryResult<AddonInstance>;

    /// Replaces an existing record.
    ///
    /// Fails with [`RegistryError::NotFound`] if it does not exist.
    async fn update(&self, instance: &AddonInstance) -> RegistryResult<()>;

    /// Deletes a record.
    ///
    /// Fails with [`RegistryError::NotFound`] if it does not exist.
    async fn delete(&self, identity: &AddonIdentity) -> RegistryResult<()>;

    /// Lists records matching a partial identity.
    async fn list(&self, filter: &PartialIdentity) -> RegistryResult<Vec<AddonInstance>>;

    /// Lists records in a namespace of a cluster, except those of one type.
    ///
    /// The filter's own type restriction is ignored.
    async fn list_excluding_type(
        &self,
        filter: &PartialIdentity,
        excluded: AddonType,
    ) -> RegistryResult<Vec<AddonInstance>> {
        let scope = PartialIdentity {
            addon_type: None,
            ..filter.clone()
        };
        let mut instances = self.list(&scope).await?;
        instances.retain(|i| i.identity.addon_type != excluded);
        Ok(instances)
    }

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

/// Sorts records by type, then name.
pub(crate) fn sort_instances(instances: &mut [AddonInstance]) {
    instances.sort_by(|a, b| {
        (a.identity.addon_type, &a.identity.name).cmp(&(b.identity.addon_type, &b.identity.name))
    });
}
