//! Addon instance registry.
//!
//! This module provides durable bookkeeping of provisioned add-ons: which
//! derived resources belong to which instance, so teardown is complete and
//! repeatable across process restarts.

mod local;
mod lock;
mod memory;
mod s3;
mod store;
mod types;

pub use local::LocalAddonRegistry;
pub use lock::{generate_holder_id, IdentityLease, IdentityLocks, LockInfo};
pub use memory::MemoryAddonRegistry;
pub use s3::S3AddonRegistry;
pub use store::{AddonRegistry, RegistryResult};
pub use types::{
    AddonIdentity, AddonInstance, AddonPayload, AddonType, AtomAppData, InstanceStatus,
    MySqlAddonData, OperatorAddonData, PartialIdentity, PgSqlAddonData, RedisAddonData,
    RECORD_VERSION,
};

#[cfg(test)]
pub use store::MockAddonRegistry;

#[cfg(test)]
pub(crate) mod test_support {
    use super::{AddonIdentity, AddonInstance, AddonPayload, AddonType, RedisAddonData};
    use crate::gateway::{ResourceKind, ResourceRef};

    /// Builds a small record in cluster `dev`, namespace `shop`.
    pub fn instance(addon_type: AddonType, name: &str) -> AddonInstance {
        AddonInstance::new(
            AddonIdentity::new(addon_type, "dev", "shop", name),
            vec![ResourceRef::namespaced(ResourceKind::StatefulSet, "shop", name)],
            AddonPayload::Redis(RedisAddonData {
                failover_name: name.to_string(),
                statefulset_name: format!("rfr-{name}"),
                sentinel_deployment_name: format!("rfs-{name}"),
                sentinel_service_name: format!("rfs-{name}"),
                auth_secret_name: None,
                replicas: 3,
                sentinels: 3,
            }),
        )
    }
}
