//! Readiness conditions over resource snapshots.
//!
//! A condition inspects one object as returned by the gateway. `Ok(Some(v))`
//! means ready and carries the extracted value, `Ok(None)` means the object
//! exists but is not ready yet, and `Err` means the snapshot could not be
//! interpreted.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::PollError;
use crate::gateway::{ResourceGateway, ResourceRef};

use super::poller::{poll_until_ready, PollSettings};

/// Why a snapshot could not be evaluated.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConditionError {
    /// The target object does not exist yet.
    #[error("{0} not found")]
    Missing(String),

    /// A field could not be decoded.
    #[error("invalid {field}: {message}")]
    Malformed {
        /// Path of the field.
        field: String,
        /// What was wrong with it.
        message: String,
    },

    /// The gateway call failed.
    #[error("{0}")]
    Gateway(String),
}

/// A predicate over one resource's runtime state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessCondition {
    /// A service exposes an allocated node port; yields the port.
    NodePortAllocated,
    /// A secret holds a key; yields the decoded value.
    SecretKeyPresent {
        /// Data key to read.
        key: String,
    },
    /// All desired statefulset replicas are ready; yields the count.
    StatefulSetReady,
    /// All desired deployment replicas are available; yields the count.
    DeploymentReady,
}

fn replica_field(snapshot: &Value, pointer: &str) -> i64 {
    snapshot.pointer(pointer).and_then(Value::as_i64).unwrap_or(0)
}

impl ReadinessCondition {
    /// Evaluates the condition against a snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if a field the condition needs is malformed.
    pub fn evaluate(&self, snapshot: &Value) -> Result<Option<Value>, ConditionError> {
        match self {
            Self::NodePortAllocated => Ok(snapshot
                .pointer("/spec/ports")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .find_map(|port| port.get("nodePort").and_then(Value::as_i64))
                .filter(|port| *port > 0)
                .map(|port| json!(port))),

            Self::SecretKeyPresent { key } => {
                if let Some(encoded) = snapshot.get("data").and_then(|d| d.get(key)).and_then(Value::as_str) {
                    let bytes = STANDARD.decode(encoded).map_err(|e| ConditionError::Malformed {
                        field: format!("data.{key}"),
                        message: e.to_string(),
                    })?;
                    let value = String::from_utf8(bytes).map_err(|e| ConditionError::Malformed {
                        field: format!("data.{key}"),
                        message: e.to_string(),
                    })?;
                    return Ok(Some(Value::String(value)));
                }
                Ok(snapshot
                    .get("stringData")
                    .and_then(|d| d.get(key))
                    .and_then(Value::as_str)
                    .map(|v| Value::String(v.to_string())))
            }

            Self::StatefulSetReady => {
                let desired = replica_field(snapshot, "/spec/replicas");
                let ready = replica_field(snapshot, "/status/readyReplicas");
                Ok((ready > 0 && ready == desired).then(|| json!(ready)))
            }

            Self::DeploymentReady => {
                let desired = replica_field(snapshot, "/spec/replicas");
                let available = replica_field(snapshot, "/status/availableReplicas");
                Ok((available > 0 && available == desired).then(|| json!(available)))
            }
        }
    }
}

/// Polls a condition against a live resource.
///
/// # Errors
///
/// Returns a [`PollError`] if the condition does not hold in time or the
/// token is cancelled.
pub async fn wait_for(
    gateway: &dyn ResourceGateway,
    target: &ResourceRef,
    condition: &ReadinessCondition,
    settings: PollSettings,
    cancel: &CancellationToken,
) -> Result<Value, PollError> {
    poll_until_ready(settings, cancel, move || async move {
        let snapshot = gateway
            .get_resource(&target.kind, target.namespace(), &target.name)
            .await
            .map_err(|e| ConditionError::Gateway(e.to_string()))?
            .ok_or_else(|| ConditionError::Missing(target.to_string()))?;
        condition.evaluate(&snapshot)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{InMemoryGateway, ResourceKind};
    use std::time::Duration;

    #[test]
    fn test_node_port() {
        let pending = json!({ "spec": { "ports": [{ "port": 3306 }] } });
        assert_eq!(ReadinessCondition::NodePortAllocated.evaluate(&pending), Ok(None));

        let allocated = json!({ "spec": { "ports": [{ "port": 3306, "nodePort": 31234 }] } });
        assert_eq!(
            ReadinessCondition::NodePortAllocated.evaluate(&allocated),
            Ok(Some(json!(31234)))
        );
    }

    #[test]
    fn test_secret_key() {
        let condition = ReadinessCondition::SecretKeyPresent {
            key: "password".to_string(),
        };
        assert_eq!(condition.evaluate(&json!({ "data": {} })), Ok(None));
        assert_eq!(
            condition.evaluate(&json!({ "data": { "password": "czNjcjN0" } })),
            Ok(Some(json!("s3cr3t")))
        );
        assert!(matches!(
            condition.evaluate(&json!({ "data": { "password": "%%%" } })),
            Err(ConditionError::Malformed { .. })
        ));
        assert_eq!(
            condition.evaluate(&json!({ "stringData": { "password": "plain" } })),
            Ok(Some(json!("plain")))
        );
    }

    #[test]
    fn test_statefulset_ready() {
        let condition = ReadinessCondition::StatefulSetReady;
        assert_eq!(condition.evaluate(&json!({ "spec": { "replicas": 3 } })), Ok(None));
        assert_eq!(
            condition.evaluate(&json!({ "spec": { "replicas": 3 }, "status": { "readyReplicas": 2 } })),
            Ok(None)
        );
        assert_eq!(
            condition.evaluate(&json!({ "spec": { "replicas": 3 }, "status": { "readyReplicas": 3 } })),
            Ok(Some(json!(3)))
        );
        // Zero running replicas is never ready, even when zero are desired
        assert_eq!(
            condition.evaluate(&json!({ "spec": { "replicas": 0 }, "status": { "readyReplicas": 0 } })),
            Ok(None)
        );
    }

    #[test]
    fn test_deployment_ready() {
        let condition = ReadinessCondition::DeploymentReady;
        assert_eq!(
            condition.evaluate(&json!({ "spec": { "replicas": 2 }, "status": { "availableReplicas": 2 } })),
            Ok(Some(json!(2)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_missing_resource_times_out_with_reason() {
        let gateway = InMemoryGateway::new();
        let target = ResourceRef::namespaced(ResourceKind::StatefulSet, "shop", "orders");

        let result = wait_for(
            &gateway,
            &target,
            &ReadinessCondition::StatefulSetReady,
            PollSettings::new(Duration::from_millis(100), Duration::from_millis(500)),
            &CancellationToken::new(),
        )
        .await;

        match result {
            Err(PollError::Timeout { last_error, .. }) => {
                assert_eq!(last_error.as_deref(), Some("StatefulSet/shop/orders not found"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_ready_workload() {
        let gateway = InMemoryGateway::with_builtin_controllers();
        gateway
            .create_resource(
                &ResourceKind::Deployment,
                Some("shop"),
                &json!({ "metadata": { "name": "web" }, "spec": { "replicas": 2 } }),
            )
            .await
            .expect("create");

        let value = wait_for(
            &gateway,
            &ResourceRef::namespaced(ResourceKind::Deployment, "shop", "web"),
            &ReadinessCondition::DeploymentReady,
            PollSettings::new(Duration::from_millis(100), Duration::from_secs(5)),
            &CancellationToken::new(),
        )
        .await
        .expect("ready");

        assert_eq!(value, json!(2));
    }
}
