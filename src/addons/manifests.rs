//! Manifest builders shared by add-on definitions.
//!
//! Core kinds are built from the typed `k8s-openapi` structs and serialized
//! to JSON for the gateway. Operator custom resources are plain JSON.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Secret, Service,
    ServiceAccount, ServicePort, ServiceSpec,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleBinding, RoleRef, Subject};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceDefinitionNames, CustomResourceDefinitionSpec,
    CustomResourceDefinitionVersion, CustomResourceValidation, JSONSchemaProps,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::error::{AddonError, Result};
use crate::gateway::CustomKind;

/// Label every object created by the engine carries.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`].
pub const MANAGED_BY: &str = "atom-addons";

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

/// Serializes a typed object into a gateway manifest.
///
/// # Errors
///
/// Returns an internal error if the object cannot be serialized.
pub fn to_manifest<T: Serialize>(object: &T) -> Result<Value> {
    serde_json::to_value(object).map_err(|e| AddonError::internal(format!("manifest serialization failed: {e}")))
}

/// Object metadata with the engine's label.
#[must_use]
pub fn meta(name: &str, labels: &BTreeMap<String, String>) -> ObjectMeta {
    let mut labels = labels.clone();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    ObjectMeta {
        name: Some(name.to_string()),
        labels: Some(labels),
        ..ObjectMeta::default()
    }
}

/// A single-entry label map.
#[must_use]
pub fn label(key: &str, value: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(key.to_string(), value.to_string())])
}

/// A service account.
///
/// # Errors
///
/// Returns an internal error if serialization fails.
pub fn service_account(name: &str) -> Result<Value> {
    to_manifest(&ServiceAccount {
        metadata: meta(name, &BTreeMap::new()),
        ..ServiceAccount::default()
    })
}

fn service_account_subject(name: &str, namespace: &str) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: name.to_string(),
        namespace: Some(namespace.to_string()),
        api_group: None,
    }
}

fn cluster_role_ref(name: &str) -> RoleRef {
    RoleRef {
        api_group: RBAC_GROUP.to_string(),
        kind: "ClusterRole".to_string(),
        name: name.to_string(),
    }
}

/// A namespaced binding of a cluster role to a service account.
///
/// # Errors
///
/// Returns an internal error if serialization fails.
pub fn role_binding(name: &str, namespace: &str, cluster_role: &str, service_account: &str) -> Result<Value> {
    to_manifest(&RoleBinding {
        metadata: meta(name, &BTreeMap::new()),
        role_ref: cluster_role_ref(cluster_role),
        subjects: Some(vec![service_account_subject(service_account, namespace)]),
    })
}

/// A cluster-wide binding of a cluster role to a service account.
///
/// # Errors
///
/// Returns an internal error if serialization fails.
pub fn cluster_role_binding(name: &str, cluster_role: &str, service_account: &str, namespace: &str) -> Result<Value> {
    to_manifest(&ClusterRoleBinding {
        metadata: meta(name, &BTreeMap::new()),
        role_ref: cluster_role_ref(cluster_role),
        subjects: Some(vec![service_account_subject(service_account, namespace)]),
    })
}

/// One policy rule.
#[must_use]
pub fn rule(api_groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    let owned = |items: &[&str]| items.iter().map(|s| (*s).to_string()).collect::<Vec<_>>();
    PolicyRule {
        api_groups: Some(owned(api_groups)),
        resources: Some(owned(resources)),
        verbs: owned(verbs),
        ..PolicyRule::default()
    }
}

/// A cluster role.
///
/// # Errors
///
/// Returns an internal error if serialization fails.
pub fn cluster_role(name: &str, rules: Vec<PolicyRule>) -> Result<Value> {
    to_manifest(&ClusterRole {
        metadata: meta(name, &BTreeMap::new()),
        rules: Some(rules),
        ..ClusterRole::default()
    })
}

/// A config map.
///
/// # Errors
///
/// Returns an internal error if serialization fails.
pub fn config_map(name: &str, data: BTreeMap<String, String>) -> Result<Value> {
    to_manifest(&ConfigMap {
        metadata: meta(name, &BTreeMap::new()),
        data: Some(data),
        ..ConfigMap::default()
    })
}

/// An opaque secret holding one plain-text key.
///
/// # Errors
///
/// Returns an internal error if serialization fails.
pub fn opaque_secret(name: &str, key: &str, value: &str) -> Result<Value> {
    to_manifest(&Secret {
        metadata: meta(name, &BTreeMap::new()),
        string_data: Some(BTreeMap::from([(key.to_string(), value.to_string())])),
        type_: Some("Opaque".to_string()),
        ..Secret::default()
    })
}

/// A service in front of pods matching `selector`.
///
/// # Errors
///
/// Returns an internal error if serialization fails.
pub fn service(name: &str, selector: &BTreeMap<String, String>, port: i32, node_port: bool) -> Result<Value> {
    to_manifest(&Service {
        metadata: meta(name, selector),
        spec: Some(ServiceSpec {
            type_: Some(if node_port { "NodePort" } else { "ClusterIP" }.to_string()),
            selector: Some(selector.clone()),
            ports: Some(vec![ServicePort {
                port,
                target_port: Some(IntOrString::Int(port)),
                ..ServicePort::default()
            }]),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    })
}

/// Container of a single-container deployment.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    /// Container image.
    pub image: String,
    /// Command-line arguments.
    pub args: Vec<String>,
    /// Exposed port.
    pub port: Option<i32>,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Service account the pod runs as.
    pub service_account: Option<String>,
}

/// A single-container deployment selected by `labels`.
///
/// # Errors
///
/// Returns an internal error if serialization fails.
pub fn deployment(name: &str, labels: &BTreeMap<String, String>, replicas: i32, container: &ContainerSpec) -> Result<Value> {
    let env: Vec<EnvVar> = container
        .env
        .iter()
        .map(|(key, value)| EnvVar {
            name: key.clone(),
            value: Some(value.clone()),
            ..EnvVar::default()
        })
        .collect();

    let pod = PodSpec {
        service_account_name: container.service_account.clone(),
        containers: vec![Container {
            name: name.to_string(),
            image: Some(container.image.clone()),
            image_pull_policy: Some("IfNotPresent".to_string()),
            args: (!container.args.is_empty()).then(|| container.args.clone()),
            ports: container.port.map(|port| {
                vec![ContainerPort {
                    container_port: port,
                    ..ContainerPort::default()
                }]
            }),
            env: (!env.is_empty()).then_some(env),
            ..Container::default()
        }],
        ..PodSpec::default()
    };

    to_manifest(&Deployment {
        metadata: meta(name, labels),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..ObjectMeta::default()
                }),
                spec: Some(pod),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    })
}

/// Name of the CRD that defines `kind`.
#[must_use]
pub fn crd_name(kind: &CustomKind) -> String {
    format!("{}.{}", kind.plural, kind.group)
}

/// A namespaced CRD with an open schema.
///
/// # Errors
///
/// Returns an internal error if serialization fails.
pub fn custom_resource_definition(kind: &CustomKind, singular: &str) -> Result<Value> {
    to_manifest(&CustomResourceDefinition {
        metadata: meta(&crd_name(kind), &BTreeMap::new()),
        spec: CustomResourceDefinitionSpec {
            group: kind.group.clone(),
            names: CustomResourceDefinitionNames {
                kind: kind.kind.clone(),
                plural: kind.plural.clone(),
                singular: Some(singular.to_string()),
                ..CustomResourceDefinitionNames::default()
            },
            scope: "Namespaced".to_string(),
            versions: vec![CustomResourceDefinitionVersion {
                name: kind.version.clone(),
                served: true,
                storage: true,
                schema: Some(CustomResourceValidation {
                    open_api_v3_schema: Some(JSONSchemaProps {
                        type_: Some("object".to_string()),
                        x_kubernetes_preserve_unknown_fields: Some(true),
                        ..JSONSchemaProps::default()
                    }),
                }),
                ..CustomResourceDefinitionVersion::default()
            }],
            ..CustomResourceDefinitionSpec::default()
        },
        ..CustomResourceDefinition::default()
    })
}

/// A volume claim template as embedded in operator custom resources.
#[must_use]
pub fn volume_claim_template(name: &str, size: &str, storage_class: Option<&str>) -> Value {
    let mut spec = json!({
        "accessModes": ["ReadWriteOnce"],
        "resources": { "requests": { "storage": size } },
    });
    if let (Some(class), Some(object)) = (storage_class, spec.as_object_mut()) {
        object.insert("storageClassName".to_string(), json!(class));
    }
    json!({ "metadata": { "name": name }, "spec": spec })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_manifest() {
        let manifest = service("orders-public", &label("app", "orders"), 3306, true).expect("manifest");
        assert_eq!(manifest["metadata"]["name"], "orders-public");
        assert_eq!(manifest["metadata"]["labels"][MANAGED_BY_LABEL], MANAGED_BY);
        assert_eq!(manifest["spec"]["type"], "NodePort");
        assert_eq!(manifest["spec"]["ports"][0]["port"], 3306);
        assert_eq!(manifest["spec"]["selector"]["app"], "orders");
    }

    #[test]
    fn test_secret_uses_string_data() {
        let manifest = opaque_secret("orders-root-user-secret", "password", "s3cr3t").expect("manifest");
        assert_eq!(manifest["stringData"]["password"], "s3cr3t");
        assert_eq!(manifest["type"], "Opaque");
    }

    #[test]
    fn test_role_binding_subject() {
        let manifest = role_binding("mysql-agent", "shop", "mysql5-operator", "mysql-agent").expect("manifest");
        assert_eq!(manifest["roleRef"]["kind"], "ClusterRole");
        assert_eq!(manifest["roleRef"]["name"], "mysql5-operator");
        assert_eq!(manifest["subjects"][0]["namespace"], "shop");
    }

    #[test]
    fn test_crd_manifest() {
        let kind = CustomKind::new("mysql.oracle.com", "v1", "MySQLCluster", "mysql5clusters");
        let manifest = custom_resource_definition(&kind, "mysql5cluster").expect("manifest");
        assert_eq!(manifest["metadata"]["name"], "mysql5clusters.mysql.oracle.com");
        assert_eq!(manifest["spec"]["names"]["kind"], "MySQLCluster");
        assert_eq!(manifest["spec"]["versions"][0]["name"], "v1");
    }

    #[test]
    fn test_deployment_manifest() {
        let container = ContainerSpec {
            image: "nginx:1.27".to_string(),
            port: Some(80),
            ..ContainerSpec::default()
        };
        let manifest = deployment("web", &label("app", "web"), 2, &container).expect("manifest");
        assert_eq!(manifest["spec"]["replicas"], 2);
        assert_eq!(manifest["spec"]["selector"]["matchLabels"]["app"], "web");
        assert_eq!(manifest["spec"]["template"]["spec"]["containers"][0]["image"], "nginx:1.27");
        assert!(manifest["spec"]["template"]["spec"]["containers"][0].get("args").is_none());
    }
}
