//! Resource kinds and references understood by the gateway.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A custom resource type served by an operator's CRD.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomKind {
    /// API group (e.g. `mysql.oracle.com`).
    pub group: String,
    /// API version within the group.
    pub version: String,
    /// Object kind.
    pub kind: String,
    /// Plural resource name used in URLs.
    pub plural: String,
}

impl CustomKind {
    /// Creates a custom kind.
    #[must_use]
    pub fn new(group: &str, version: &str, kind: &str, plural: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
        }
    }
}

/// Kind of a cluster resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Core namespace.
    Namespace,
    /// Core service account.
    ServiceAccount,
    /// Core config map.
    ConfigMap,
    /// Core secret.
    Secret,
    /// Core service.
    Service,
    /// Core persistent volume claim.
    PersistentVolumeClaim,
    /// Apps deployment.
    Deployment,
    /// Apps statefulset.
    StatefulSet,
    /// RBAC role binding.
    RoleBinding,
    /// RBAC cluster role.
    ClusterRole,
    /// RBAC cluster role binding.
    ClusterRoleBinding,
    /// API extensions CRD.
    CustomResourceDefinition,
    /// An operator-defined kind.
    Custom(CustomKind),
}

impl ResourceKind {
    /// Returns the API group, empty for the core group.
    #[must_use]
    pub fn group(&self) -> &str {
        match self {
            Self::Namespace
            | Self::ServiceAccount
            | Self::ConfigMap
            | Self::Secret
            | Self::Service
            | Self::PersistentVolumeClaim => "",
            Self::Deployment | Self::StatefulSet => "apps",
            Self::RoleBinding | Self::ClusterRole | Self::ClusterRoleBinding => {
                "rbac.authorization.k8s.io"
            }
            Self::CustomResourceDefinition => "apiextensions.k8s.io",
            Self::Custom(custom) => &custom.group,
        }
    }

    /// Returns the API version within the group.
    #[must_use]
    pub fn version(&self) -> &str {
        match self {
            Self::Custom(custom) => &custom.version,
            _ => "v1",
        }
    }

    /// Returns the `apiVersion` field value.
    #[must_use]
    pub fn api_version(&self) -> String {
        let group = self.group();
        if group.is_empty() {
            self.version().to_string()
        } else {
            format!("{group}/{}", self.version())
        }
    }

    /// Returns the object kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Namespace => "Namespace",
            Self::ServiceAccount => "ServiceAccount",
            Self::ConfigMap => "ConfigMap",
            Self::Secret => "Secret",
            Self::Service => "Service",
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
            Self::RoleBinding => "RoleBinding",
            Self::ClusterRole => "ClusterRole",
            Self::ClusterRoleBinding => "ClusterRoleBinding",
            Self::CustomResourceDefinition => "CustomResourceDefinition",
            Self::Custom(custom) => &custom.kind,
        }
    }

    /// Returns the plural resource name.
    #[must_use]
    pub fn plural(&self) -> &str {
        match self {
            Self::Namespace => "namespaces",
            Self::ServiceAccount => "serviceaccounts",
            Self::ConfigMap => "configmaps",
            Self::Secret => "secrets",
            Self::Service => "services",
            Self::PersistentVolumeClaim => "persistentvolumeclaims",
            Self::Deployment => "deployments",
            Self::StatefulSet => "statefulsets",
            Self::RoleBinding => "rolebindings",
            Self::ClusterRole => "clusterroles",
            Self::ClusterRoleBinding => "clusterrolebindings",
            Self::CustomResourceDefinition => "customresourcedefinitions",
            Self::Custom(custom) => &custom.plural,
        }
    }

    /// Returns true if objects of this kind live in a namespace.
    #[must_use]
    pub const fn is_namespaced(&self) -> bool {
        !matches!(
            self,
            Self::Namespace | Self::ClusterRole | Self::ClusterRoleBinding | Self::CustomResourceDefinition
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Reference to one derived resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Kind of the resource.
    pub kind: ResourceKind,
    /// Name of the resource.
    pub name: String,
    /// Namespace, absent for cluster-scoped kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ResourceRef {
    /// Creates a reference to a namespaced resource.
    #[must_use]
    pub fn namespaced(kind: ResourceKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
        }
    }

    /// Creates a reference to a cluster-scoped resource.
    #[must_use]
    pub fn cluster(kind: ResourceKind, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            namespace: None,
        }
    }

    /// Returns the namespace as a borrowed string.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{ns}/{}", self.kind, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_version() {
        assert_eq!(ResourceKind::Secret.api_version(), "v1");
        assert_eq!(ResourceKind::StatefulSet.api_version(), "apps/v1");
        assert_eq!(
            ResourceKind::ClusterRole.api_version(),
            "rbac.authorization.k8s.io/v1"
        );

        let cr = ResourceKind::Custom(CustomKind::new("mysql.oracle.com", "v1", "MySQLCluster", "mysql5clusters"));
        assert_eq!(cr.api_version(), "mysql.oracle.com/v1");
        assert_eq!(cr.plural(), "mysql5clusters");
        assert!(cr.is_namespaced());
        assert!(!ResourceKind::CustomResourceDefinition.is_namespaced());
    }

    #[test]
    fn test_ref_serialization() {
        let r = ResourceRef::namespaced(ResourceKind::ConfigMap, "shop", "orders-cnf");
        let json = serde_json::to_value(&r).expect("serialize");
        assert_eq!(json["kind"], "ConfigMap");
        assert_eq!(json["namespace"], "shop");

        let crd = ResourceRef::cluster(ResourceKind::CustomResourceDefinition, "x.y.z");
        let json = serde_json::to_value(&crd).expect("serialize");
        assert!(json.get("namespace").is_none());
        let back: ResourceRef = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, crd);
        assert_eq!(back.to_string(), "CustomResourceDefinition/x.y.z");
    }
}
