//! Addon instance records.
//!
//! These types are the persisted form of a provisioned add-on. Field names
//! are part of the stored document schema; other tooling reads them to
//! inspect or clean up instances by hand.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::gateway::ResourceRef;

/// Current version of the record format.
pub const RECORD_VERSION: &str = "1.0";

/// Kind of add-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddonType {
    /// MySQL 5 cluster managed by the mysql5 operator.
    MySqlV5,
    /// PostgreSQL cluster managed by the zalando operator.
    PostgreSql,
    /// Redis failover managed by the spotahome operator.
    Redis,
    /// Generic application deployment.
    AtomApp,
    /// An operator installation.
    Operator,
}

impl AddonType {
    /// All add-on types.
    pub const ALL: [Self; 5] = [
        Self::MySqlV5,
        Self::PostgreSql,
        Self::Redis,
        Self::AtomApp,
        Self::Operator,
    ];

    /// Returns the stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MySqlV5 => "mysqlv5",
            Self::PostgreSql => "postgresql",
            Self::Redis => "redis",
            Self::AtomApp => "atomapp",
            Self::Operator => "operator",
        }
    }
}

impl fmt::Display for AddonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AddonType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown addon type '{s}'"))
    }
}

/// The identity tuple of an add-on instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonIdentity {
    /// Instance name.
    pub name: String,
    /// Namespace the instance lives in.
    pub namespace: String,
    /// Cluster the instance lives on.
    pub cluster_id: String,
    /// Kind of add-on.
    #[serde(rename = "type")]
    pub addon_type: AddonType,
}

impl AddonIdentity {
    /// Creates an identity.
    #[must_use]
    pub fn new(addon_type: AddonType, cluster_id: &str, namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            cluster_id: cluster_id.to_string(),
            addon_type,
        }
    }

    /// Returns a key that is safe to use as a file or object name.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!(
            "{}__{}__{}__{}",
            self.cluster_id, self.namespace, self.addon_type, self.name
        )
    }
}

impl fmt::Display for AddonIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/{}/{}",
            self.addon_type, self.cluster_id, self.namespace, self.name
        )
    }
}

/// A partial identity used for listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartialIdentity {
    /// Namespace to list.
    pub namespace: String,
    /// Cluster to list.
    pub cluster_id: String,
    /// Restrict to one add-on type.
    pub addon_type: Option<AddonType>,
}

impl PartialIdentity {
    /// Creates a filter over a namespace of a cluster.
    #[must_use]
    pub fn new(cluster_id: &str, namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            cluster_id: cluster_id.to_string(),
            addon_type: None,
        }
    }

    /// Restricts the filter to one type.
    #[must_use]
    pub const fn with_type(mut self, addon_type: AddonType) -> Self {
        self.addon_type = Some(addon_type);
        self
    }

    /// Returns true if the identity matches this filter.
    #[must_use]
    pub fn matches(&self, identity: &AddonIdentity) -> bool {
        identity.namespace == self.namespace
            && identity.cluster_id == self.cluster_id
            && self.addon_type.is_none_or(|t| t == identity.addon_type)
    }
}

/// Lifecycle status of a recorded instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Fully provisioned.
    #[default]
    Ready,
    /// Provisioned but reported unhealthy.
    Degraded,
    /// Under maintenance by an operator.
    Maintenance,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Maintenance => "maintenance",
        };
        f.write_str(s)
    }
}

impl FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ready" => Ok(Self::Ready),
            "degraded" => Ok(Self::Degraded),
            "maintenance" => Ok(Self::Maintenance),
            _ => Err(format!("unknown status '{s}'")),
        }
    }
}

/// Derived resources of a MySQL v5 cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MySqlAddonData {
    /// Statefulset created by the operator.
    pub statefulset_name: String,
    /// Headless service created by the operator.
    pub service_name: String,
    /// Exported node port service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_port_service_name: Option<String>,
    /// Allocated node port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    /// Public address of the cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_domain: Option<String>,
    /// Number of members.
    pub members: i32,
    /// User configuration map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_name: Option<String>,
    /// Secret holding the root password.
    pub root_password_secret_name: String,
    /// Data volume claims, one per member.
    pub data_volume_names: Vec<String>,
    /// Backup volume claims, one per member.
    pub backup_volume_names: Vec<String>,
}

/// Derived resources of a PostgreSQL cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PgSqlAddonData {
    /// Owning team.
    pub team_id: String,
    /// Cluster custom resource name.
    pub cluster_name: String,
    /// Master service.
    pub service_name: String,
    /// Statefulset created by the operator.
    pub statefulset_name: String,
    /// Generated superuser credentials.
    pub default_root_secret_name: String,
    /// Public address of the cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_domain: Option<String>,
    /// Number of instances.
    pub replicas: i32,
    /// Data volume claims.
    pub data_volume_names: Vec<String>,
}

/// Derived resources of a Redis failover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisAddonData {
    /// Failover custom resource name.
    pub failover_name: String,
    /// Redis statefulset.
    pub statefulset_name: String,
    /// Sentinel deployment.
    pub sentinel_deployment_name: String,
    /// Sentinel service clients connect to.
    pub sentinel_service_name: String,
    /// Password secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_secret_name: Option<String>,
    /// Redis replicas.
    pub replicas: i32,
    /// Sentinel replicas.
    pub sentinels: i32,
}

/// Derived resources of a generic application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtomAppData {
    /// Deployment name.
    pub deployment_name: String,
    /// Cluster service name.
    pub service_name: String,
    /// Exported node port service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_port_service_name: Option<String>,
    /// Allocated node port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    /// Public address of the application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_domain: Option<String>,
    /// Container image.
    pub image: String,
    /// Replica count.
    pub replicas: i32,
}

/// Derived resources of an operator installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorAddonData {
    /// Operator deployment.
    pub deployment_name: String,
    /// Operator image.
    pub image: String,
    /// Installed CRDs.
    pub crd_names: Vec<String>,
    /// Service accounts.
    pub service_account_names: Vec<String>,
    /// Cluster roles.
    pub cluster_role_names: Vec<String>,
    /// Cluster role bindings.
    pub cluster_role_binding_names: Vec<String>,
    /// Operator configuration map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_name: Option<String>,
    /// Operator service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
}

/// Type-specific payload of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddonPayload {
    /// MySQL v5 cluster.
    #[serde(rename = "mysqlAddon")]
    MySql(MySqlAddonData),
    /// PostgreSQL cluster.
    #[serde(rename = "pgsqlAddon")]
    PgSql(PgSqlAddonData),
    /// Redis failover.
    #[serde(rename = "redisAddon")]
    Redis(RedisAddonData),
    /// Generic application.
    #[serde(rename = "atomApp")]
    AtomApp(AtomAppData),
    /// Operator installation.
    #[serde(rename = "operatorAddon")]
    Operator(OperatorAddonData),
}

/// A recorded add-on instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonInstance {
    /// Record format version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Identity tuple.
    #[serde(flatten)]
    pub identity: AddonIdentity,
    /// Lifecycle status.
    #[serde(default)]
    pub status: InstanceStatus,
    /// When the instance was provisioned.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
    /// Exclusively owned resources in creation order.
    pub resources: Vec<ResourceRef>,
    /// Type-specific derived resource map.
    #[serde(flatten)]
    pub payload: AddonPayload,
}

fn default_version() -> String {
    RECORD_VERSION.to_string()
}

impl AddonInstance {
    /// Creates a new record stamped with the current time.
    #[must_use]
    pub fn new(identity: AddonIdentity, resources: Vec<ResourceRef>, payload: AddonPayload) -> Self {
        let now = Utc::now();
        Self {
            version: RECORD_VERSION.to_string(),
            identity,
            status: InstanceStatus::Ready,
            created_at: now,
            updated_at: now,
            resources,
            payload,
        }
    }

    /// Returns the resources in teardown order.
    #[must_use]
    pub fn teardown_order(&self) -> Vec<ResourceRef> {
        self.resources.iter().rev().cloned().collect()
    }

    /// Marks the record as modified.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ResourceKind;

    fn sample() -> AddonInstance {
        AddonInstance::new(
            AddonIdentity::new(AddonType::AtomApp, "dev", "shop", "web"),
            vec![
                ResourceRef::namespaced(ResourceKind::Deployment, "shop", "web"),
                ResourceRef::namespaced(ResourceKind::Service, "shop", "web"),
            ],
            AddonPayload::AtomApp(AtomAppData {
                deployment_name: "web".to_string(),
                service_name: "web".to_string(),
                node_port_service_name: None,
                port: None,
                service_domain: None,
                image: "nginx:1.27".to_string(),
                replicas: 1,
            }),
        )
    }

    #[test]
    fn test_document_schema() {
        let json = serde_json::to_value(sample()).expect("serialize");

        assert_eq!(json["name"], "web");
        assert_eq!(json["namespace"], "shop");
        assert_eq!(json["clusterId"], "dev");
        assert_eq!(json["type"], "atomapp");
        assert_eq!(json["status"], "ready");
        assert_eq!(json["atomApp"]["deploymentName"], "web");
        assert!(json["atomApp"].get("port").is_none());

        let back: AddonInstance = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, sample_with_times(&back));
    }

    fn sample_with_times(other: &AddonInstance) -> AddonInstance {
        let mut s = sample();
        s.created_at = other.created_at;
        s.updated_at = other.updated_at;
        s
    }

    #[test]
    fn test_teardown_order_is_reverse() {
        let order = sample().teardown_order();
        assert_eq!(order[0].kind, ResourceKind::Service);
        assert_eq!(order[1].kind, ResourceKind::Deployment);
    }

    #[test]
    fn test_partial_identity_matches() {
        let id = AddonIdentity::new(AddonType::Redis, "dev", "shop", "cache");
        assert!(PartialIdentity::new("dev", "shop").matches(&id));
        assert!(PartialIdentity::new("dev", "shop").with_type(AddonType::Redis).matches(&id));
        assert!(!PartialIdentity::new("dev", "shop").with_type(AddonType::AtomApp).matches(&id));
        assert!(!PartialIdentity::new("prod", "shop").matches(&id));
    }

    #[test]
    fn test_type_parse() {
        assert_eq!("MySQLv5".parse::<AddonType>(), Ok(AddonType::MySqlV5));
        assert!("rabbitmq".parse::<AddonType>().is_err());
        assert_eq!(AddonIdentity::new(AddonType::Redis, "dev", "shop", "cache").to_string(), "redis:dev/shop/cache");
    }
}
