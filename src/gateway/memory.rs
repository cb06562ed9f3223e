//! In-memory implementation of the resource gateway.
//!
//! Objects live in an ordered map. Controllers stand in for the cluster's
//! own reconcilers: they can adjust an object as it is stored (allocate a
//! node port, report a workload as ready) and spawn the objects an operator
//! would create for a custom resource. Deleting an object also deletes its
//! dependents through owner references. Faults can be injected per object
//! name, and every mutating call is journaled so tests can assert ordering.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::GatewayError;

use super::client::{GatewayResult, ResourceGateway};
use super::types::{ResourceKind, ResourceRef};

/// First port handed out by the node port allocator.
const NODE_PORT_BASE: i64 = 30000;

/// An object spawned by a controller.
#[derive(Debug, Clone)]
pub struct SpawnedObject {
    /// Kind of the spawned object.
    pub kind: ResourceKind,
    /// Namespace of the spawned object.
    pub namespace: Option<String>,
    /// Full manifest, including `metadata.name`.
    pub manifest: Value,
}

/// A simulated cluster controller.
pub trait Controller: Send + Sync {
    /// Adjusts an object that is about to be stored and returns any objects
    /// it causes to exist.
    fn reconcile(&self, kind: &ResourceKind, namespace: Option<&str>, object: &mut Value) -> Vec<SpawnedObject>;
}

impl<F> Controller for F
where
    F: Fn(&ResourceKind, Option<&str>, &mut Value) -> Vec<SpawnedObject> + Send + Sync,
{
    fn reconcile(&self, kind: &ResourceKind, namespace: Option<&str>, object: &mut Value) -> Vec<SpawnedObject> {
        self(kind, namespace, object)
    }
}

/// A mutating call observed by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    /// A namespace was created.
    CreateNamespace(String),
    /// An object was created by a caller.
    Create(ResourceRef),
    /// An object was deleted by a caller.
    Delete(ResourceRef),
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, Value>,
    namespaces: BTreeSet<String>,
    journal: Vec<GatewayCall>,
    fail_create: HashSet<String>,
    fail_delete: HashSet<String>,
    fail_get: HashSet<String>,
}

/// Gateway that keeps every object in memory.
#[derive(Default)]
pub struct InMemoryGateway {
    inner: Mutex<Inner>,
    controllers: Vec<Box<dyn Controller>>,
}

impl std::fmt::Debug for InMemoryGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryGateway")
            .field("controllers", &self.controllers.len())
            .finish_non_exhaustive()
    }
}

/// Builds the map key for an object.
fn storage_key(kind: &ResourceKind, namespace: Option<&str>, name: &str) -> String {
    let namespace = namespace.filter(|_| kind.is_namespaced()).unwrap_or("");
    format!("{}/{}/{namespace}/{name}", kind.api_version(), kind.kind())
}

/// Extracts `metadata.name` from a manifest.
fn manifest_name(manifest: &Value) -> GatewayResult<String> {
    manifest
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| GatewayError::invalid_manifest("metadata.name is required"))
}

impl InMemoryGateway {
    /// Creates an empty gateway with no controllers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a gateway that allocates node ports and reports every
    /// workload as ready.
    #[must_use]
    pub fn with_builtin_controllers() -> Self {
        Self::new()
            .with_controller(NodePortAllocator::default())
            .with_controller(ReadyWorkloads)
    }

    /// Adds a controller.
    #[must_use]
    pub fn with_controller(mut self, controller: impl Controller + 'static) -> Self {
        self.controllers.push(Box::new(controller));
        self
    }

    fn inner(&self) -> GatewayResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| GatewayError::transport("in-memory gateway lock poisoned"))
    }

    /// Makes every create of an object with this name fail.
    pub fn fail_create_of(&self, name: &str) {
        if let Ok(mut inner) = self.inner() {
            inner.fail_create.insert(name.to_string());
        }
    }

    /// Makes every delete of an object with this name fail.
    pub fn fail_delete_of(&self, name: &str) {
        if let Ok(mut inner) = self.inner() {
            inner.fail_delete.insert(name.to_string());
        }
    }

    /// Makes every read of an object with this name fail.
    pub fn fail_get_of(&self, name: &str) {
        if let Ok(mut inner) = self.inner() {
            inner.fail_get.insert(name.to_string());
        }
    }

    /// Removes all injected faults.
    pub fn clear_faults(&self) {
        if let Ok(mut inner) = self.inner() {
            inner.fail_create.clear();
            inner.fail_delete.clear();
            inner.fail_get.clear();
        }
    }

    /// Returns the journal of mutating calls.
    #[must_use]
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.inner().map(|inner| inner.journal.clone()).unwrap_or_default()
    }

    /// Returns the references deleted by callers, in order.
    #[must_use]
    pub fn deleted(&self) -> Vec<ResourceRef> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::Delete(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    /// Returns true if the object exists.
    #[must_use]
    pub fn contains(&self, kind: &ResourceKind, namespace: Option<&str>, name: &str) -> bool {
        self.object(kind, namespace, name).is_some()
    }

    /// Returns a stored object.
    #[must_use]
    pub fn object(&self, kind: &ResourceKind, namespace: Option<&str>, name: &str) -> Option<Value> {
        let key = storage_key(kind, namespace, name);
        self.inner()
            .ok()
            .and_then(|inner| inner.objects.get(&key).cloned())
    }

    /// Returns the number of stored objects, excluding namespaces.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.inner().map(|inner| inner.objects.len()).unwrap_or_default()
    }

    /// Returns true if the namespace exists.
    #[must_use]
    pub fn has_namespace(&self, name: &str) -> bool {
        self.inner().is_ok_and(|inner| inner.namespaces.contains(name))
    }

    /// Stores an object directly, bypassing faults and the journal.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest has no name.
    pub fn seed(&self, kind: &ResourceKind, namespace: Option<&str>, manifest: Value) -> GatewayResult<()> {
        let name = manifest_name(&manifest)?;
        let mut inner = self.inner()?;
        inner.objects.insert(storage_key(kind, namespace, &name), manifest);
        Ok(())
    }

    /// Stamps type and namespace metadata the way an API server would.
    fn stamp(kind: &ResourceKind, namespace: Option<&str>, manifest: &mut Value) {
        if let Some(object) = manifest.as_object_mut() {
            object.insert("apiVersion".to_string(), Value::String(kind.api_version()));
            object.insert("kind".to_string(), Value::String(kind.kind().to_string()));
        }
        if let (Some(ns), true) = (namespace, kind.is_namespaced()) {
            if let Some(metadata) = manifest.get_mut("metadata").and_then(Value::as_object_mut) {
                metadata.insert("namespace".to_string(), Value::String(ns.to_string()));
            }
        }
    }

    /// Runs controllers over a newly created object and everything it spawns.
    fn materialize(&self, kind: &ResourceKind, namespace: Option<&str>, manifest: Value) -> Vec<(ResourceKind, Option<String>, Value)> {
        let mut pending = VecDeque::from([(kind.clone(), namespace.map(str::to_string), manifest)]);
        let mut settled = Vec::new();

        while let Some((kind, namespace, mut object)) = pending.pop_front() {
            Self::stamp(&kind, namespace.as_deref(), &mut object);
            for controller in &self.controllers {
                for spawned in controller.reconcile(&kind, namespace.as_deref(), &mut object) {
                    pending.push_back((spawned.kind, spawned.namespace, spawned.manifest));
                }
            }
            settled.push((kind, namespace, object));
        }

        settled
    }
}

#[async_trait]
impl ResourceGateway for InMemoryGateway {
    async fn create_namespace_if_absent(&self, name: &str) -> GatewayResult<bool> {
        let mut inner = self.inner()?;
        if inner.fail_create.contains(name) {
            return Err(GatewayError::Injected {
                message: format!("create of namespace {name} refused"),
            });
        }
        let created = inner.namespaces.insert(name.to_string());
        if created {
            inner.journal.push(GatewayCall::CreateNamespace(name.to_string()));
        }
        Ok(created)
    }

    async fn create_resource(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        manifest: &Value,
    ) -> GatewayResult<Value> {
        let name = manifest_name(manifest)?;
        let key = storage_key(kind, namespace, &name);

        {
            let inner = self.inner()?;
            if inner.fail_create.contains(&name) {
                return Err(GatewayError::Injected {
                    message: format!("create of {kind} {name} refused"),
                });
            }
            if inner.objects.contains_key(&key) {
                return Err(GatewayError::AlreadyExists {
                    kind: kind.to_string(),
                    name,
                });
            }
        }

        let settled = self.materialize(kind, namespace, manifest.clone());
        let created = settled
            .first()
            .map(|(_, _, object)| object.clone())
            .unwrap_or_else(|| manifest.clone());

        let mut inner = self.inner()?;
        for (kind, namespace, object) in settled {
            let Ok(object_name) = manifest_name(&object) else {
                continue;
            };
            let object_key = storage_key(&kind, namespace.as_deref(), &object_name);
            debug!("Storing {kind} {object_name}");
            inner.objects.entry(object_key).or_insert(object);
        }

        let reference = ResourceRef {
            kind: kind.clone(),
            name,
            namespace: namespace.filter(|_| kind.is_namespaced()).map(str::to_string),
        };
        inner.journal.push(GatewayCall::Create(reference));

        Ok(created)
    }

    async fn get_resource(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> GatewayResult<Option<Value>> {
        let inner = self.inner()?;
        if inner.fail_get.contains(name) {
            return Err(GatewayError::Injected {
                message: format!("read of {kind} {name} refused"),
            });
        }
        let key = storage_key(kind, namespace, name);
        Ok(inner.objects.get(&key).cloned())
    }

    async fn delete_resource(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> GatewayResult<()> {
        let mut inner = self.inner()?;
        if inner.fail_delete.contains(name) {
            return Err(GatewayError::Injected {
                message: format!("delete of {kind} {name} refused"),
            });
        }
        let key = storage_key(kind, namespace, name);
        if let Some(removed) = inner.objects.remove(&key) {
            collect_garbage(&mut inner.objects, &removed);
        }
        inner.journal.push(GatewayCall::Delete(ResourceRef {
            kind: kind.clone(),
            name: name.to_string(),
            namespace: namespace.filter(|_| kind.is_namespaced()).map(str::to_string),
        }));
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

/// Identity of an owner as dependents reference it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Owner {
    api_version: String,
    kind: String,
    name: String,
    namespace: Option<String>,
}

impl Owner {
    fn of(object: &Value) -> Option<Self> {
        let field = |pointer: &str| object.pointer(pointer).and_then(Value::as_str).map(str::to_string);
        Some(Self {
            api_version: field("/apiVersion")?,
            kind: field("/kind")?,
            name: field("/metadata/name")?,
            namespace: field("/metadata/namespace"),
        })
    }

    fn owns(&self, object: &Value) -> bool {
        let namespace = object.pointer("/metadata/namespace").and_then(Value::as_str);
        if self.namespace.is_some() && namespace != self.namespace.as_deref() {
            return false;
        }
        object
            .pointer("/metadata/ownerReferences")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .any(|reference| {
                reference.get("apiVersion").and_then(Value::as_str) == Some(self.api_version.as_str())
                    && reference.get("kind").and_then(Value::as_str) == Some(self.kind.as_str())
                    && reference.get("name").and_then(Value::as_str) == Some(self.name.as_str())
            })
    }
}

/// Removes every object transitively owned by `removed` through
/// `metadata.ownerReferences`, the way the cluster garbage collector does.
fn collect_garbage(objects: &mut BTreeMap<String, Value>, removed: &Value) {
    let mut owners: Vec<Owner> = Owner::of(removed).into_iter().collect();

    while let Some(owner) = owners.pop() {
        let dependents: Vec<String> = objects
            .iter()
            .filter(|(_, object)| owner.owns(object))
            .map(|(key, _)| key.clone())
            .collect();

        for key in dependents {
            if let Some(object) = objects.remove(&key) {
                debug!("Collected {key} owned by {}/{}", owner.kind, owner.name);
                owners.extend(Owner::of(&object));
            }
        }
    }
}

/// Assigns node ports to `NodePort` services.
#[derive(Debug)]
pub struct NodePortAllocator {
    next: AtomicI64,
}

impl Default for NodePortAllocator {
    fn default() -> Self {
        Self {
            next: AtomicI64::new(NODE_PORT_BASE),
        }
    }
}

impl Controller for NodePortAllocator {
    fn reconcile(&self, kind: &ResourceKind, _namespace: Option<&str>, object: &mut Value) -> Vec<SpawnedObject> {
        if *kind != ResourceKind::Service
            || object.pointer("/spec/type").and_then(Value::as_str) != Some("NodePort")
        {
            return Vec::new();
        }

        if let Some(ports) = object.pointer_mut("/spec/ports").and_then(Value::as_array_mut) {
            for port in ports.iter_mut().filter(|p| p.get("nodePort").is_none()) {
                if let Some(port) = port.as_object_mut() {
                    let allocated = self.next.fetch_add(1, Ordering::SeqCst);
                    port.insert("nodePort".to_string(), json!(allocated));
                }
            }
        }
        Vec::new()
    }
}

/// Reports every deployment and statefulset as fully ready.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadyWorkloads;

impl Controller for ReadyWorkloads {
    fn reconcile(&self, kind: &ResourceKind, _namespace: Option<&str>, object: &mut Value) -> Vec<SpawnedObject> {
        if !matches!(kind, ResourceKind::Deployment | ResourceKind::StatefulSet) {
            return Vec::new();
        }
        let replicas = object
            .pointer("/spec/replicas")
            .and_then(Value::as_i64)
            .unwrap_or(1);
        if let Some(object) = object.as_object_mut() {
            object.insert(
                "status".to_string(),
                json!({
                    "replicas": replicas,
                    "readyReplicas": replicas,
                    "availableReplicas": replicas,
                }),
            );
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_map(name: &str) -> Value {
        json!({ "metadata": { "name": name }, "data": {} })
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let gateway = InMemoryGateway::new();

        let created = gateway
            .create_resource(&ResourceKind::ConfigMap, Some("shop"), &config_map("cnf"))
            .await
            .expect("create");
        assert_eq!(created["apiVersion"], "v1");
        assert_eq!(created["metadata"]["namespace"], "shop");

        let fetched = gateway
            .get_resource(&ResourceKind::ConfigMap, Some("shop"), "cnf")
            .await
            .expect("get");
        assert!(fetched.is_some());

        gateway
            .delete_resource(&ResourceKind::ConfigMap, Some("shop"), "cnf")
            .await
            .expect("delete");
        assert!(!gateway.contains(&ResourceKind::ConfigMap, Some("shop"), "cnf"));
    }

    #[tokio::test]
    async fn test_delete_absent_succeeds() {
        let gateway = InMemoryGateway::new();
        tokio_test::assert_ok!(
            gateway
                .delete_resource(&ResourceKind::Secret, Some("shop"), "missing")
                .await
        );
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let gateway = InMemoryGateway::new();
        gateway
            .create_resource(&ResourceKind::ConfigMap, Some("shop"), &config_map("cnf"))
            .await
            .expect("create");

        let result = gateway
            .create_resource(&ResourceKind::ConfigMap, Some("shop"), &config_map("cnf"))
            .await;
        assert!(matches!(result, Err(GatewayError::AlreadyExists { .. })));

        // Same name in another namespace is a different object
        gateway
            .create_resource(&ResourceKind::ConfigMap, Some("other"), &config_map("cnf"))
            .await
            .expect("create in other namespace");
    }

    #[tokio::test]
    async fn test_namespace_created_once() {
        let gateway = InMemoryGateway::new();
        assert!(gateway.create_namespace_if_absent("shop").await.expect("ns"));
        assert!(!gateway.create_namespace_if_absent("shop").await.expect("ns"));
        assert_eq!(gateway.calls(), vec![GatewayCall::CreateNamespace("shop".to_string())]);
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let gateway = InMemoryGateway::new();
        gateway.fail_create_of("cnf");

        let result = gateway
            .create_resource(&ResourceKind::ConfigMap, Some("shop"), &config_map("cnf"))
            .await;
        assert!(matches!(result, Err(GatewayError::Injected { .. })));
        assert!(gateway.calls().is_empty());

        gateway.clear_faults();
        gateway.fail_delete_of("cnf");
        gateway
            .create_resource(&ResourceKind::ConfigMap, Some("shop"), &config_map("cnf"))
            .await
            .expect("create");
        assert!(
            gateway
                .delete_resource(&ResourceKind::ConfigMap, Some("shop"), "cnf")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_delete_collects_owned_objects() {
        let gateway = InMemoryGateway::new();
        gateway
            .create_resource(&ResourceKind::ConfigMap, Some("shop"), &config_map("parent"))
            .await
            .expect("create");
        gateway
            .seed(
                &ResourceKind::Secret,
                Some("shop"),
                json!({
                    "metadata": {
                        "name": "child",
                        "namespace": "shop",
                        "ownerReferences": [{ "apiVersion": "v1", "kind": "ConfigMap", "name": "parent" }]
                    }
                }),
            )
            .expect("seed");
        gateway
            .seed(&ResourceKind::Secret, Some("shop"), json!({ "metadata": { "name": "unrelated" } }))
            .expect("seed");

        gateway
            .delete_resource(&ResourceKind::ConfigMap, Some("shop"), "parent")
            .await
            .expect("delete");

        assert!(!gateway.contains(&ResourceKind::Secret, Some("shop"), "child"));
        assert!(gateway.contains(&ResourceKind::Secret, Some("shop"), "unrelated"));
    }

    #[tokio::test]
    async fn test_node_port_allocation() {
        let gateway = InMemoryGateway::with_builtin_controllers();
        let service = json!({
            "metadata": { "name": "orders-public" },
            "spec": { "type": "NodePort", "ports": [{ "port": 3306 }] }
        });

        let created = gateway
            .create_resource(&ResourceKind::Service, Some("shop"), &service)
            .await
            .expect("create");
        assert_eq!(created["spec"]["ports"][0]["nodePort"], NODE_PORT_BASE);
    }

    #[tokio::test]
    async fn test_controller_spawns_objects() {
        let gateway = InMemoryGateway::new().with_controller(
            |kind: &ResourceKind, namespace: Option<&str>, object: &mut Value| {
                if *kind != ResourceKind::ConfigMap {
                    return Vec::new();
                }
                let name = object["metadata"]["name"].as_str().unwrap_or_default();
                vec![SpawnedObject {
                    kind: ResourceKind::Secret,
                    namespace: namespace.map(str::to_string),
                    manifest: json!({ "metadata": { "name": format!("{name}-generated") } }),
                }]
            },
        );

        gateway
            .create_resource(&ResourceKind::ConfigMap, Some("shop"), &config_map("cnf"))
            .await
            .expect("create");

        assert!(gateway.contains(&ResourceKind::Secret, Some("shop"), "cnf-generated"));
        // Spawned objects are not caller calls
        assert_eq!(gateway.calls().len(), 1);
    }
}
