//! Redis failover clusters managed by the spotahome operator.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{ParamsError, Result};
use crate::gateway::{CustomKind, ResourceKind, ResourceRef};
use crate::readiness::ReadinessCondition;
use crate::registry::{AddonIdentity, AddonPayload, AddonType, RedisAddonData};
use crate::saga::{SagaOutcome, Step};

use super::manifests;
use super::{in_range, non_empty, service_host, AddonCatalog, AddonDefinition, AddonSummary};

const SENTINEL_PORT: i64 = 26379;

/// The operator's failover resource.
#[must_use]
pub fn redis_failover_kind() -> CustomKind {
    CustomKind::new("databases.spotahome.com", "v1", "RedisFailover", "redisfailovers")
}

/// Parameters of a Redis failover.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisParams {
    /// Failover name.
    pub name: String,
    /// Target namespace.
    pub namespace: String,
    /// Target cluster id.
    #[serde(default)]
    pub cluster_id: Option<String>,
    /// Redis replicas, 1 to 10.
    #[serde(default)]
    pub replicas: Option<i32>,
    /// Sentinel replicas, 1 to 7.
    #[serde(default)]
    pub sentinels: Option<i32>,
    /// Password required by clients.
    #[serde(default)]
    pub password: Option<String>,
}

impl RedisParams {
    pub(super) fn resolve(&self, catalog: &AddonCatalog) -> std::result::Result<RedisDefinition, ParamsError> {
        let identity = catalog.identity(
            AddonType::Redis,
            self.cluster_id.as_deref(),
            &self.namespace,
            &self.name,
        )?;
        non_empty("password", self.password.as_ref())?;

        Ok(RedisDefinition {
            identity,
            replicas: in_range("replicas", self.replicas, 3, 1, 10)?,
            sentinels: in_range("sentinels", self.sentinels, 3, 1, 7)?,
            password: self.password.clone(),
            catalog: catalog.clone(),
        })
    }
}

/// A resolved Redis failover.
#[derive(Debug, Clone)]
pub struct RedisDefinition {
    identity: AddonIdentity,
    replicas: i32,
    sentinels: i32,
    password: Option<String>,
    catalog: AddonCatalog,
}

impl RedisDefinition {
    fn name(&self) -> &str {
        &self.identity.name
    }

    fn auth_secret(&self) -> Option<String> {
        self.password.as_ref().map(|_| format!("{}-redis-auth", self.name()))
    }

    fn redis_statefulset(&self) -> String {
        format!("rfr-{}", self.name())
    }

    fn sentinel_deployment(&self) -> String {
        format!("rfs-{}", self.name())
    }

    fn failover_manifest(&self) -> Value {
        let mut spec = Map::new();
        spec.insert("redis".to_string(), json!({ "replicas": self.replicas }));
        spec.insert("sentinel".to_string(), json!({ "replicas": self.sentinels }));
        if let Some(secret) = self.auth_secret() {
            spec.insert("auth".to_string(), json!({ "secretPath": secret }));
        }
        json!({
            "metadata": { "name": self.name() },
            "spec": spec,
        })
    }
}

impl AddonDefinition for RedisDefinition {
    fn identity(&self) -> &AddonIdentity {
        &self.identity
    }

    fn plan(&self) -> Result<Vec<Step>> {
        let ns = self.identity.namespace.as_str();
        let polling = &self.catalog.polling;
        let mut steps = vec![Step::ensure_namespace("namespace", ns)];

        if let (Some(secret), Some(password)) = (self.auth_secret(), &self.password) {
            steps.push(Step::create(
                "auth-secret",
                ResourceRef::namespaced(ResourceKind::Secret, ns, &secret),
                manifests::opaque_secret(&secret, "password", password)?,
            ));
        }

        steps.push(Step::create(
            "failover",
            ResourceRef::namespaced(ResourceKind::Custom(redis_failover_kind()), ns, self.name()),
            self.failover_manifest(),
        ));
        steps.push(Step::await_ready(
            "poll-redis-ready",
            "statefulset-ready",
            ResourceRef::namespaced(ResourceKind::StatefulSet, ns, &self.redis_statefulset()),
            ReadinessCondition::StatefulSetReady,
            polling.workload(),
        ));
        steps.push(Step::await_ready(
            "poll-sentinel-ready",
            "deployment-ready",
            ResourceRef::namespaced(ResourceKind::Deployment, ns, &self.sentinel_deployment()),
            ReadinessCondition::DeploymentReady,
            polling.workload(),
        ));

        Ok(steps)
    }

    fn payload(&self, _outcome: &SagaOutcome) -> AddonPayload {
        AddonPayload::Redis(RedisAddonData {
            failover_name: self.name().to_string(),
            statefulset_name: self.redis_statefulset(),
            sentinel_deployment_name: self.sentinel_deployment(),
            sentinel_service_name: self.sentinel_deployment(),
            auth_secret_name: self.auth_secret(),
            replicas: self.replicas,
            sentinels: self.sentinels,
        })
    }

    fn summary(&self, outcome: &SagaOutcome) -> AddonSummary {
        let sentinel = self.sentinel_deployment();
        let mut summary = AddonSummary::new(self.identity.clone(), &sentinel, outcome);
        summary.port = Some(SENTINEL_PORT);
        summary.domain = Some(service_host(&sentinel, &self.identity.namespace));
        summary.password.clone_from(&self.password);
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saga::StepAction;

    fn params() -> RedisParams {
        RedisParams {
            name: "cache".to_string(),
            namespace: "shop".to_string(),
            ..RedisParams::default()
        }
    }

    #[test]
    fn test_plan_without_password() {
        let definition = params().resolve(&AddonCatalog::default()).expect("resolve");
        let plan = definition.plan().expect("plan");
        let names: Vec<&str> = plan.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["namespace", "failover", "poll-redis-ready", "poll-sentinel-ready"]
        );
    }

    #[test]
    fn test_password_secret_precedes_failover() {
        let mut p = params();
        p.password = Some("hunter2".to_string());
        p.sentinels = Some(5);
        let definition = p.resolve(&AddonCatalog::default()).expect("resolve");
        let plan = definition.plan().expect("plan");

        assert_eq!(plan[1].name, "auth-secret");
        match &plan[2].action {
            StepAction::Create { manifest, .. } => {
                assert_eq!(manifest["spec"]["auth"]["secretPath"], "cache-redis-auth");
                assert_eq!(manifest["spec"]["sentinel"]["replicas"], 5);
                assert_eq!(manifest["spec"]["redis"]["replicas"], 3);
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_sentinel_range() {
        let mut p = params();
        p.sentinels = Some(8);
        assert!(matches!(
            p.resolve(&AddonCatalog::default()),
            Err(ParamsError::OutOfRange { field: "sentinels", .. })
        ));
    }
}
