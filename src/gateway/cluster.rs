//! Kubernetes implementation of the resource gateway.
//!
//! Every kind goes through `Api<DynamicObject>` so built-in and custom
//! resources share one code path. Namespaces use the typed API.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, DynamicObject, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

use crate::error::GatewayError;

use super::client::{GatewayResult, ResourceGateway};
use super::types::ResourceKind;

/// HTTP status returned when an object does not exist.
const NOT_FOUND: u16 = 404;

/// HTTP status returned when an object name is already taken.
const CONFLICT: u16 = 409;

/// Gateway backed by a Kubernetes API server.
#[derive(Clone)]
pub struct KubeGateway {
    /// Shared API client.
    client: Client,
}

impl std::fmt::Debug for KubeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeGateway").finish_non_exhaustive()
    }
}

impl KubeGateway {
    /// Creates a gateway from an existing client.
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connects using an explicit kubeconfig file, or the inferred
    /// configuration (in-cluster or `~/.kube/config`) when none is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or the client
    /// cannot be built.
    pub async fn connect(kubeconfig: Option<&Path>) -> GatewayResult<Self> {
        let config = match kubeconfig {
            Some(path) => {
                info!("Loading kubeconfig from: {}", path.display());
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| GatewayError::transport(format!("Failed to read kubeconfig: {e}")))?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| GatewayError::transport(format!("Invalid kubeconfig: {e}")))?
            }
            None => Config::infer()
                .await
                .map_err(|e| GatewayError::transport(format!("Failed to infer cluster config: {e}")))?,
        };

        debug!("Connecting to cluster at {}", config.cluster_url);
        let client = Client::try_from(config).map_err(map_kube_error)?;
        Ok(Self::new(client))
    }

    /// Builds a dynamic API handle for a kind.
    fn api(&self, kind: &ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = api_resource(kind);
        match namespace {
            Some(ns) if kind.is_namespaced() => Api::namespaced_with(self.client.clone(), ns, &resource),
            _ => Api::all_with(self.client.clone(), &resource),
        }
    }
}

/// Describes a kind for the dynamic API.
fn api_resource(kind: &ResourceKind) -> ApiResource {
    ApiResource {
        group: kind.group().to_string(),
        version: kind.version().to_string(),
        api_version: kind.api_version(),
        kind: kind.kind().to_string(),
        plural: kind.plural().to_string(),
    }
}

/// Converts a manifest into a dynamic object, stamping type metadata and
/// the target namespace.
fn to_dynamic(
    kind: &ResourceKind,
    namespace: Option<&str>,
    manifest: &Value,
) -> GatewayResult<DynamicObject> {
    let mut manifest = manifest.clone();
    let object = manifest
        .as_object_mut()
        .ok_or_else(|| GatewayError::invalid_manifest("manifest must be a JSON object"))?;

    object.insert("apiVersion".to_string(), Value::String(kind.api_version()));
    object.insert("kind".to_string(), Value::String(kind.kind().to_string()));

    if let Some(ns) = namespace.filter(|_| kind.is_namespaced()) {
        let metadata = object
            .entry("metadata")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert("namespace".to_string(), Value::String(ns.to_string()));
        }
    }

    serde_json::from_value(manifest).map_err(|e| GatewayError::invalid_manifest(e.to_string()))
}

fn to_value(object: &DynamicObject) -> GatewayResult<Value> {
    serde_json::to_value(object).map_err(|e| GatewayError::invalid_manifest(e.to_string()))
}

fn map_kube_error(err: kube::Error) -> GatewayError {
    match err {
        kube::Error::Api(response) => GatewayError::api(response.code, response.message),
        other => GatewayError::transport(other.to_string()),
    }
}

#[async_trait]
impl ResourceGateway for KubeGateway {
    async fn create_namespace_if_absent(&self, name: &str) -> GatewayResult<bool> {
        let api: Api<Namespace> = Api::all(self.client.clone());

        if api.get_opt(name).await.map_err(map_kube_error)?.is_some() {
            debug!("Namespace {name} already exists");
            return Ok(false);
        }

        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        };

        match api.create(&PostParams::default(), &namespace).await {
            Ok(_) => {
                info!("Created namespace {name}");
                Ok(true)
            }
            Err(kube::Error::Api(response)) if response.code == CONFLICT => Ok(false),
            Err(e) => Err(map_kube_error(e)),
        }
    }

    async fn create_resource(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        manifest: &Value,
    ) -> GatewayResult<Value> {
        let object = to_dynamic(kind, namespace, manifest)?;
        let name = object.metadata.name.clone().unwrap_or_default();
        debug!("Creating {kind} {name}");

        match self.api(kind, namespace).create(&PostParams::default(), &object).await {
            Ok(created) => to_value(&created),
            Err(kube::Error::Api(response)) if response.code == CONFLICT => Err(GatewayError::AlreadyExists {
                kind: kind.to_string(),
                name,
            }),
            Err(e) => Err(map_kube_error(e)),
        }
    }

    async fn get_resource(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> GatewayResult<Option<Value>> {
        let object = self
            .api(kind, namespace)
            .get_opt(name)
            .await
            .map_err(map_kube_error)?;

        object.as_ref().map(to_value).transpose()
    }

    async fn delete_resource(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> GatewayResult<()> {
        debug!("Deleting {kind} {name}");

        match self.api(kind, namespace).delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == NOT_FOUND => {
                debug!("{kind} {name} already absent");
                Ok(())
            }
            Err(e) => Err(map_kube_error(e)),
        }
    }

    fn backend_type(&self) -> &'static str {
        "kube"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::CustomKind;
    use serde_json::json;

    #[test]
    fn test_api_resource_for_custom_kind() {
        let kind = ResourceKind::Custom(CustomKind::new(
            "acid.zalan.do",
            "v1",
            "postgresql",
            "postgresqls",
        ));
        let resource = api_resource(&kind);

        assert_eq!(resource.group, "acid.zalan.do");
        assert_eq!(resource.api_version, "acid.zalan.do/v1");
        assert_eq!(resource.plural, "postgresqls");
    }

    #[test]
    fn test_to_dynamic_stamps_type_and_namespace() {
        let manifest = json!({
            "metadata": { "name": "orders-cnf" },
            "data": { "my.cnf": "[mysqld]" }
        });

        let object = to_dynamic(&ResourceKind::ConfigMap, Some("shop"), &manifest).expect("convert");
        assert_eq!(object.metadata.name.as_deref(), Some("orders-cnf"));
        assert_eq!(object.metadata.namespace.as_deref(), Some("shop"));

        let types = object.types.expect("type meta");
        assert_eq!(types.api_version, "v1");
        assert_eq!(types.kind, "ConfigMap");
        assert_eq!(object.data["data"]["my.cnf"], "[mysqld]");
    }

    #[test]
    fn test_to_dynamic_cluster_scoped_ignores_namespace() {
        let manifest = json!({ "metadata": { "name": "mysql5-operator" }, "rules": [] });
        let object = to_dynamic(&ResourceKind::ClusterRole, Some("shop"), &manifest).expect("convert");
        assert!(object.metadata.namespace.is_none());
    }

    #[test]
    fn test_to_dynamic_rejects_non_object() {
        let result = to_dynamic(&ResourceKind::Secret, None, &json!("nope"));
        assert!(matches!(result, Err(GatewayError::InvalidManifest { .. })));
    }
}
