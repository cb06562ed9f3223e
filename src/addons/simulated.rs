//! Simulated operators for the in-memory gateway.
//!
//! Dry runs and tests need the objects an operator would create for a
//! custom resource so readiness steps have something to observe. Owned
//! children carry owner references; volume claims do not, matching what
//! statefulset controllers leave behind on deletion.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::gateway::{Controller, InMemoryGateway, ResourceKind, SpawnedObject};

use super::{mysql_cluster_kind, postgresql_kind, redis_failover_kind};

/// Creates an in-memory gateway with node port allocation, ready
/// workloads and simulated operators for every custom kind.
#[must_use]
pub fn simulated_gateway() -> InMemoryGateway {
    InMemoryGateway::with_builtin_controllers().with_controller(OperatorSimulator)
}

/// Spawns the children the MySQL, postgres and redis operators create.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperatorSimulator;

impl Controller for OperatorSimulator {
    fn reconcile(&self, kind: &ResourceKind, namespace: Option<&str>, object: &mut Value) -> Vec<SpawnedObject> {
        let ResourceKind::Custom(custom) = kind else {
            return Vec::new();
        };
        let Some(name) = object.pointer("/metadata/name").and_then(Value::as_str) else {
            return Vec::new();
        };
        let parent = Parent {
            owner: owner_reference(kind, name),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        };

        if *custom == mysql_cluster_kind() {
            parent.mysql_cluster(object)
        } else if *custom == postgresql_kind() {
            parent.postgresql(object)
        } else if *custom == redis_failover_kind() {
            parent.redis_failover(object)
        } else {
            Vec::new()
        }
    }
}

fn owner_reference(kind: &ResourceKind, name: &str) -> Value {
    json!({
        "apiVersion": kind.api_version(),
        "kind": kind.kind(),
        "name": name,
        "controller": true,
    })
}

fn replicas(object: &Value, pointer: &str, default: i64) -> i64 {
    object.pointer(pointer).and_then(Value::as_i64).unwrap_or(default)
}

fn generated_password() -> String {
    Uuid::new_v4().simple().to_string()
}

struct Parent {
    owner: Value,
    namespace: Option<String>,
    name: String,
}

impl Parent {
    fn spawn(&self, kind: ResourceKind, manifest: Value) -> SpawnedObject {
        SpawnedObject {
            kind,
            namespace: self.namespace.clone(),
            manifest,
        }
    }

    fn owned(&self, kind: ResourceKind, name: &str, body: Value) -> SpawnedObject {
        let mut manifest = json!({
            "metadata": {
                "name": name,
                "ownerReferences": [self.owner.clone()],
            },
        });
        if let (Some(target), Value::Object(fields)) = (manifest.as_object_mut(), body) {
            target.extend(fields);
        }
        self.spawn(kind, manifest)
    }

    fn volume_claims(&self, prefixes: &[&str], base: &str, count: i64) -> Vec<SpawnedObject> {
        prefixes
            .iter()
            .flat_map(|prefix| (0..count).map(move |i| format!("{prefix}-{base}-{i}")))
            .map(|name| self.spawn(ResourceKind::PersistentVolumeClaim, json!({ "metadata": { "name": name } })))
            .collect()
    }

    fn mysql_cluster(&self, cluster: &Value) -> Vec<SpawnedObject> {
        let members = replicas(cluster, "/spec/replicas", 1);
        let mut spawned = Vec::new();

        if cluster.pointer("/spec/secretRef").is_none() {
            let password = STANDARD.encode(generated_password());
            spawned.push(self.owned(
                ResourceKind::Secret,
                &format!("{}-root-password", self.name),
                json!({ "type": "Opaque", "data": { "password": password } }),
            ));
        }
        spawned.push(self.owned(
            ResourceKind::StatefulSet,
            &self.name,
            json!({ "spec": { "replicas": members } }),
        ));

        let mut prefixes = vec!["data"];
        if cluster.pointer("/spec/backupVolumeClaimTemplate").is_some() {
            prefixes.push("backup");
        }
        spawned.extend(self.volume_claims(&prefixes, &self.name, members));
        spawned
    }

    fn postgresql(&self, cluster: &Value) -> Vec<SpawnedObject> {
        let instances = replicas(cluster, "/spec/numberOfInstances", 1);
        let mut spawned = vec![
            self.owned(
                ResourceKind::Secret,
                &format!("postgres.{}.credentials", self.name),
                json!({
                    "type": "Opaque",
                    "data": {
                        "username": STANDARD.encode("postgres"),
                        "password": STANDARD.encode(generated_password()),
                    },
                }),
            ),
            self.owned(
                ResourceKind::StatefulSet,
                &self.name,
                json!({ "spec": { "replicas": instances } }),
            ),
            self.owned(
                ResourceKind::Service,
                &self.name,
                json!({ "spec": { "type": "ClusterIP", "ports": [{ "port": 5432 }] } }),
            ),
        ];
        spawned.extend(self.volume_claims(&["pgdata"], &self.name, instances));
        spawned
    }

    fn redis_failover(&self, failover: &Value) -> Vec<SpawnedObject> {
        let redis = replicas(failover, "/spec/redis/replicas", 3);
        let sentinels = replicas(failover, "/spec/sentinel/replicas", 3);
        let sentinel = format!("rfs-{}", self.name);

        vec![
            self.owned(
                ResourceKind::StatefulSet,
                &format!("rfr-{}", self.name),
                json!({ "spec": { "replicas": redis } }),
            ),
            self.owned(
                ResourceKind::Deployment,
                &sentinel,
                json!({ "spec": { "replicas": sentinels } }),
            ),
            self.owned(
                ResourceKind::Service,
                &sentinel,
                json!({ "spec": { "type": "ClusterIP", "ports": [{ "port": 26379 }] } }),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ResourceGateway;

    #[tokio::test]
    async fn test_mysql_cluster_children() {
        let gateway = simulated_gateway();
        gateway
            .create_resource(
                &ResourceKind::Custom(mysql_cluster_kind()),
                Some("shop"),
                &json!({ "metadata": { "name": "orders" }, "spec": { "replicas": 2 } }),
            )
            .await
            .expect("create");

        let secret = gateway
            .object(&ResourceKind::Secret, Some("shop"), "orders-root-password")
            .expect("secret");
        assert!(secret["data"]["password"].is_string());

        let statefulset = gateway
            .object(&ResourceKind::StatefulSet, Some("shop"), "orders")
            .expect("statefulset");
        assert_eq!(statefulset["status"]["readyReplicas"], 2);
        assert!(gateway.contains(&ResourceKind::PersistentVolumeClaim, Some("shop"), "data-orders-1"));
        assert!(!gateway.contains(&ResourceKind::PersistentVolumeClaim, Some("shop"), "backup-orders-0"));
    }

    #[tokio::test]
    async fn test_deleting_parent_keeps_volume_claims() {
        let gateway = simulated_gateway();
        let kind = ResourceKind::Custom(postgresql_kind());
        gateway
            .create_resource(
                &kind,
                Some("finance"),
                &json!({ "metadata": { "name": "atom-ledger" }, "spec": { "numberOfInstances": 2 } }),
            )
            .await
            .expect("create");
        assert!(gateway.contains(&ResourceKind::Secret, Some("finance"), "postgres.atom-ledger.credentials"));

        gateway
            .delete_resource(&kind, Some("finance"), "atom-ledger")
            .await
            .expect("delete");

        assert!(!gateway.contains(&ResourceKind::StatefulSet, Some("finance"), "atom-ledger"));
        assert!(!gateway.contains(&ResourceKind::Secret, Some("finance"), "postgres.atom-ledger.credentials"));
        assert!(gateway.contains(&ResourceKind::PersistentVolumeClaim, Some("finance"), "pgdata-atom-ledger-1"));
    }

    #[tokio::test]
    async fn test_supplied_secret_is_not_generated() {
        let gateway = simulated_gateway();
        gateway
            .create_resource(
                &ResourceKind::Custom(mysql_cluster_kind()),
                Some("shop"),
                &json!({
                    "metadata": { "name": "orders" },
                    "spec": { "replicas": 1, "secretRef": { "name": "orders-root-user-secret" } },
                }),
            )
            .await
            .expect("create");
        assert!(!gateway.contains(&ResourceKind::Secret, Some("shop"), "orders-root-password"));
    }

    #[tokio::test]
    async fn test_redis_failover_children() {
        let gateway = simulated_gateway();
        gateway
            .create_resource(
                &ResourceKind::Custom(redis_failover_kind()),
                Some("shop"),
                &json!({ "metadata": { "name": "cache" }, "spec": { "redis": { "replicas": 3 }, "sentinel": { "replicas": 5 } } }),
            )
            .await
            .expect("create");

        let sentinel = gateway
            .object(&ResourceKind::Deployment, Some("shop"), "rfs-cache")
            .expect("sentinel");
        assert_eq!(sentinel["status"]["availableReplicas"], 5);
        assert!(gateway.contains(&ResourceKind::StatefulSet, Some("shop"), "rfr-cache"));
    }
}
