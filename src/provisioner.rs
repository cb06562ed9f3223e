//! Add-on provisioning engine.
//!
//! This module ties the pieces together: a request is resolved into a
//! definition, its steps run as a saga against the gateway, and the result
//! is recorded in the registry. Teardown walks the recorded resources in
//! reverse and deletes the record last.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::addons::{AddonCatalog, AddonRequest, AddonSummary};
use crate::error::{AddonError, RegistryError, Result};
use crate::gateway::{ResourceGateway, ResourceRef};
use crate::registry::{
    AddonIdentity, AddonInstance, AddonRegistry, AddonType, IdentityLease, IdentityLocks,
    InstanceStatus, PartialIdentity,
};
use crate::saga::{delete_ref, get_ref, RunBounds, SagaExecutor, SharedUsage, StepDescription};

/// What a teardown did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    /// Resources deleted by this call.
    pub deleted: Vec<ResourceRef>,
    /// Resources that were already gone.
    pub skipped: Vec<ResourceRef>,
}

/// Other instances of the same type in the same namespace, in flight or
/// recorded. Shared objects stay while any exist.
struct NamespaceSiblings<'a> {
    identity: &'a AddonIdentity,
    locks: &'a IdentityLocks,
    registry: &'a dyn AddonRegistry,
}

#[async_trait]
impl SharedUsage for NamespaceSiblings<'_> {
    async fn in_use_elsewhere(&self, resource: &ResourceRef) -> bool {
        let filter = PartialIdentity::new(&self.identity.cluster_id, &self.identity.namespace)
            .with_type(self.identity.addon_type);

        if let Some(other) = self.locks.held_in(&filter).into_iter().find(|id| id != self.identity) {
            debug!("{resource} is shared with {other}, which is in flight");
            return true;
        }

        match self.registry.list(&filter).await {
            Ok(instances) => match instances.iter().find(|i| i.identity != *self.identity) {
                Some(other) => {
                    debug!("{resource} is shared with recorded {}", other.identity);
                    true
                }
                None => false,
            },
            Err(e) => {
                warn!("Cannot tell whether {resource} is still shared, keeping it: {e}");
                true
            }
        }
    }
}

/// Provisions and tears down add-on instances.
pub struct AddonProvisioner {
    gateway: Arc<dyn ResourceGateway>,
    registry: Arc<dyn AddonRegistry>,
    catalog: AddonCatalog,
    locks: IdentityLocks,
}

impl std::fmt::Debug for AddonProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddonProvisioner")
            .field("gateway", &self.gateway.backend_type())
            .field("registry", &self.registry.backend_type())
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

impl AddonProvisioner {
    /// Creates a new provisioner.
    #[must_use]
    pub fn new(gateway: Arc<dyn ResourceGateway>, registry: Arc<dyn AddonRegistry>, catalog: AddonCatalog) -> Self {
        Self {
            gateway,
            registry,
            catalog,
            locks: IdentityLocks::new(),
        }
    }

    /// Gets the catalog requests are resolved against.
    #[must_use]
    pub const fn catalog(&self) -> &AddonCatalog {
        &self.catalog
    }

    /// Renders the steps a request would run, without running them.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is invalid.
    pub fn plan(&self, request: &AddonRequest) -> Result<Vec<StepDescription>> {
        let definition = self.catalog.resolve(request)?;
        Ok(definition.plan()?.iter().map(|step| step.describe()).collect())
    }

    /// Provisions an add-on.
    ///
    /// # Errors
    ///
    /// Returns [`AddonError::DuplicateInstance`] if the identity is already
    /// recorded, [`AddonError::InstanceBusy`] if another call holds it, a
    /// saga error after compensation, or [`AddonError::InstanceRecordLost`]
    /// if every step succeeded but the record could not be written.
    pub async fn provision(&self, request: &AddonRequest, bounds: &RunBounds) -> Result<AddonSummary> {
        let definition = self.catalog.resolve(request)?;
        let identity = definition.identity().clone();
        let _lease = self.lease(&identity, "provision")?;

        if bounds.cancel.is_cancelled() {
            return Err(AddonError::Cancelled);
        }

        if self.registry.exists(&identity).await.map_err(registry_error)? {
            return Err(AddonError::DuplicateInstance {
                identity: identity.to_string(),
            });
        }

        let steps = definition.plan()?;
        info!("Provisioning {identity}");
        let siblings = NamespaceSiblings {
            identity: &identity,
            locks: &self.locks,
            registry: self.registry.as_ref(),
        };
        let outcome = SagaExecutor::new(self.gateway.as_ref())
            .with_shared_usage(&siblings)
            .execute(&identity.to_string(), &steps, bounds)
            .await?;

        let instance = AddonInstance::new(identity.clone(), outcome.resources.clone(), definition.payload(&outcome));
        if let Err(e) = self.registry.store(&instance).await {
            error!(
                "Provisioned {identity} but could not record it: {e}. {} resource(s) left without a record",
                instance.resources.len()
            );
            return Err(AddonError::InstanceRecordLost {
                identity: identity.to_string(),
                cause: e.to_string(),
                resources: instance.resources,
            });
        }

        info!("Recorded {identity} with {} resource(s)", instance.resources.len());
        Ok(definition.summary(&outcome))
    }

    /// Tears down an add-on and deletes its record.
    ///
    /// Resources that are already gone are skipped, so a call that failed
    /// partway can be repeated.
    ///
    /// # Errors
    ///
    /// Returns [`AddonError::InstanceNotFound`] if nothing is recorded, or
    /// [`AddonError::PartialTeardown`] if a deletion failed. The record is
    /// kept in that case.
    pub async fn deprovision(&self, identity: &AddonIdentity, bounds: &RunBounds) -> Result<TeardownReport> {
        let _lease = self.lease(identity, "deprovision")?;
        let instance = self.registry.get(identity).await.map_err(registry_error)?;
        let order = instance.teardown_order();
        let mut report = TeardownReport::default();

        info!("Tearing down {identity} ({} resource(s))", order.len());
        for (i, resource) in order.iter().enumerate() {
            let attempt = bounds
                .guard(async {
                    match get_ref(self.gateway.as_ref(), resource).await {
                        Ok(Some(_)) => delete_ref(self.gateway.as_ref(), resource).await.map(|()| true),
                        Ok(None) => Ok(false),
                        Err(e) => Err(e),
                    }
                })
                .await;

            let cause = match attempt {
                Ok(Ok(true)) => {
                    report.deleted.push(resource.clone());
                    continue;
                }
                Ok(Ok(false)) => {
                    report.skipped.push(resource.clone());
                    continue;
                }
                Ok(Err(e)) => format!("{resource}: {e}"),
                Err(reason) => format!("{resource}: {reason}"),
            };

            warn!("Teardown of {identity} stopped: {cause}");
            return Err(AddonError::PartialTeardown {
                identity: identity.to_string(),
                deleted: report.deleted.iter().map(ToString::to_string).collect(),
                remaining: order[i..].iter().map(ToString::to_string).collect(),
                cause,
            });
        }

        self.registry.delete(identity).await.map_err(registry_error)?;
        info!(
            "Deprovisioned {identity}: {} deleted, {} already gone",
            report.deleted.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Loads one record.
    ///
    /// # Errors
    ///
    /// Returns [`AddonError::InstanceNotFound`] if nothing is recorded.
    pub async fn get(&self, identity: &AddonIdentity) -> Result<AddonInstance> {
        self.registry.get(identity).await.map_err(registry_error)
    }

    /// Lists records matching a partial identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read.
    pub async fn list(&self, filter: &PartialIdentity) -> Result<Vec<AddonInstance>> {
        self.registry.list(filter).await.map_err(registry_error)
    }

    /// Lists records in a namespace, except those of one type.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read.
    pub async fn list_excluding_type(&self, filter: &PartialIdentity, excluded: AddonType) -> Result<Vec<AddonInstance>> {
        self.registry
            .list_excluding_type(filter, excluded)
            .await
            .map_err(registry_error)
    }

    /// Changes the status of a record.
    ///
    /// # Errors
    ///
    /// Returns [`AddonError::InstanceNotFound`] if nothing is recorded.
    pub async fn set_status(&self, identity: &AddonIdentity, status: InstanceStatus) -> Result<AddonInstance> {
        let _lease = self.lease(identity, "set-status")?;
        let mut instance = self.registry.get(identity).await.map_err(registry_error)?;
        instance.status = status;
        instance.touch();
        self.registry.update(&instance).await.map_err(registry_error)?;
        info!("Set status of {identity} to {status}");
        Ok(instance)
    }

    fn lease(&self, identity: &AddonIdentity, operation: &str) -> Result<IdentityLease> {
        self.locks.try_acquire(identity, operation).map_err(|held| {
            warn!("{identity} is busy: {} by {}", held.operation, held.holder);
            AddonError::InstanceBusy {
                identity: identity.to_string(),
            }
        })
    }
}

/// Maps registry failures onto the engine's error kinds.
fn registry_error(error: RegistryError) -> AddonError {
    match error {
        RegistryError::NotFound { identity } => AddonError::InstanceNotFound { identity },
        RegistryError::Unavailable { message } => AddonError::RegistryUnavailable { message },
        other => AddonError::Registry(other),
    }
}
