//! Gateway trait definition.
//!
//! This module defines the verbs the engine needs from the cluster API.
//! Implementations must be idempotent on absence: deleting a missing object
//! succeeds.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::GatewayError;

use super::types::{CustomKind, ResourceKind};

/// Result type for gateway calls.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Trait for cluster resource gateways.
#[async_trait]
pub trait ResourceGateway: Send + Sync {
    /// Creates the namespace unless it already exists.
    ///
    /// Returns `true` if this call created it.
    async fn create_namespace_if_absent(&self, name: &str) -> GatewayResult<bool>;

    /// Creates an object from its manifest and returns the stored object.
    ///
    /// Fails with [`GatewayError::AlreadyExists`] if the name is taken.
    async fn create_resource(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        manifest: &Value,
    ) -> GatewayResult<Value>;

    /// Fetches an object, returning `None` if it does not exist.
    async fn get_resource(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> GatewayResult<Option<Value>>;

    /// Deletes an object. Deleting a missing object succeeds.
    async fn delete_resource(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> GatewayResult<()>;

    /// Creates a namespaced custom resource.
    async fn create_custom_resource(
        &self,
        custom: &CustomKind,
        namespace: &str,
        manifest: &Value,
    ) -> GatewayResult<Value> {
        self.create_resource(&ResourceKind::Custom(custom.clone()), Some(namespace), manifest)
            .await
    }

    /// Deletes a namespaced custom resource. Deleting a missing object succeeds.
    async fn delete_custom_resource(
        &self,
        custom: &CustomKind,
        namespace: &str,
        name: &str,
    ) -> GatewayResult<()> {
        self.delete_resource(&ResourceKind::Custom(custom.clone()), Some(namespace), name)
            .await
    }

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
