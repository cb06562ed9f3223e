//! PostgreSQL team clusters managed by the zalando operator.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::error::{ParamsError, Result};
use crate::gateway::{CustomKind, ResourceKind, ResourceRef};
use crate::readiness::ReadinessCondition;
use crate::registry::{AddonIdentity, AddonPayload, AddonType, PgSqlAddonData};
use crate::saga::{SagaOutcome, Step};

use super::{check_name, in_range, non_empty, output_string, service_host, AddonCatalog, AddonDefinition, AddonSummary};

const DEFAULT_TEAM: &str = "atom";
const DEFAULT_VOLUME: &str = "1Gi";
const DEFAULT_VERSION: &str = "11";
const POSTGRES_PORT: i64 = 5432;

/// The operator's cluster resource.
#[must_use]
pub fn postgresql_kind() -> CustomKind {
    CustomKind::new("acid.zalan.do", "v1", "postgresql", "postgresqls")
}

/// Volume of each instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostgresVolume {
    /// Size, e.g. `1Gi`.
    pub size: String,
    /// Storage class. Cluster default otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

/// Parameters of a PostgreSQL cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostgresParams {
    /// Cluster name, prefixed with the team id on the platform.
    pub name: String,
    /// Target namespace.
    pub namespace: String,
    /// Target cluster id.
    #[serde(default)]
    pub cluster_id: Option<String>,
    /// Owning team.
    #[serde(default)]
    pub team_id: Option<String>,
    /// Number of instances, 1 to 10.
    #[serde(default, alias = "replicas")]
    pub instances: Option<i32>,
    /// Instance volume.
    #[serde(default)]
    pub volume: Option<PostgresVolume>,
    /// Major version.
    #[serde(default)]
    pub version: Option<String>,
    /// Users and their role flags.
    #[serde(default)]
    pub users: BTreeMap<String, Vec<String>>,
    /// Databases and their owners.
    #[serde(default)]
    pub databases: BTreeMap<String, String>,
}

impl PostgresParams {
    pub(super) fn resolve(&self, catalog: &AddonCatalog) -> std::result::Result<PostgresDefinition, ParamsError> {
        let identity = catalog.identity(
            AddonType::PostgreSql,
            self.cluster_id.as_deref(),
            &self.namespace,
            &self.name,
        )?;
        let team = self.team_id.clone().unwrap_or_else(|| DEFAULT_TEAM.to_string());
        check_name("teamId", &team)?;
        let cluster_name = format!("{team}-{}", self.name);
        check_name("name", &cluster_name)?;
        non_empty("version", self.version.as_ref())?;

        let volume = self.volume.clone().unwrap_or_else(|| PostgresVolume {
            size: DEFAULT_VOLUME.to_string(),
            storage_class: catalog.storage_class.clone(),
        });
        non_empty("volume.size", Some(&volume.size))?;

        for owner in self.databases.values() {
            if !self.users.contains_key(owner) {
                return Err(ParamsError::Invalid {
                    field: "databases",
                    message: format!("owner '{owner}' is not a declared user"),
                });
            }
        }

        Ok(PostgresDefinition {
            identity,
            team,
            cluster_name,
            instances: in_range("instances", self.instances, 2, 1, 10)?,
            volume,
            version: self.version.clone().unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            users: self.users.clone(),
            databases: self.databases.clone(),
            catalog: catalog.clone(),
        })
    }
}

/// A resolved PostgreSQL cluster.
#[derive(Debug, Clone)]
pub struct PostgresDefinition {
    identity: AddonIdentity,
    team: String,
    cluster_name: String,
    instances: i32,
    volume: PostgresVolume,
    version: String,
    users: BTreeMap<String, Vec<String>>,
    databases: BTreeMap<String, String>,
    catalog: AddonCatalog,
}

impl PostgresDefinition {
    fn credentials_secret(&self) -> String {
        format!("postgres.{}.credentials", self.cluster_name)
    }

    fn volume_names(&self) -> Vec<String> {
        (0..self.instances)
            .map(|i| format!("pgdata-{}-{i}", self.cluster_name))
            .collect()
    }

    fn cluster_manifest(&self) -> Value {
        let mut volume = json!({ "size": self.volume.size });
        if let (Some(class), Some(object)) = (&self.volume.storage_class, volume.as_object_mut()) {
            object.insert("storageClass".to_string(), json!(class));
        }

        json!({
            "metadata": { "name": self.cluster_name },
            "spec": {
                "teamId": self.team,
                "numberOfInstances": self.instances,
                "volume": volume,
                "postgresql": { "version": self.version },
                "users": self.users,
                "databases": self.databases,
                "resources": {
                    "requests": { "cpu": "100m", "memory": "250Mi" }
                },
            },
        })
    }
}

impl AddonDefinition for PostgresDefinition {
    fn identity(&self) -> &AddonIdentity {
        &self.identity
    }

    fn plan(&self) -> Result<Vec<Step>> {
        let ns = self.identity.namespace.as_str();
        let polling = &self.catalog.polling;
        let volumes = self
            .volume_names()
            .iter()
            .map(|pvc| ResourceRef::namespaced(ResourceKind::PersistentVolumeClaim, ns, pvc))
            .collect();

        Ok(vec![
            Step::ensure_namespace("namespace", ns),
            Step::create_with_derived(
                "cluster",
                ResourceRef::namespaced(ResourceKind::Custom(postgresql_kind()), ns, &self.cluster_name),
                self.cluster_manifest(),
                volumes,
            ),
            Step::await_ready(
                "poll-credentials",
                "credentials",
                ResourceRef::namespaced(ResourceKind::Secret, ns, &self.credentials_secret()),
                ReadinessCondition::SecretKeyPresent {
                    key: "password".to_string(),
                },
                polling.secret(),
            )
            .output("password"),
            Step::await_ready(
                "poll-statefulset-ready",
                "statefulset-ready",
                ResourceRef::namespaced(ResourceKind::StatefulSet, ns, &self.cluster_name),
                ReadinessCondition::StatefulSetReady,
                polling.workload(),
            ),
        ])
    }

    fn payload(&self, _outcome: &SagaOutcome) -> AddonPayload {
        AddonPayload::PgSql(PgSqlAddonData {
            team_id: self.team.clone(),
            cluster_name: self.cluster_name.clone(),
            service_name: self.cluster_name.clone(),
            statefulset_name: self.cluster_name.clone(),
            default_root_secret_name: self.credentials_secret(),
            service_domain: Some(service_host(&self.cluster_name, &self.identity.namespace)),
            replicas: self.instances,
            data_volume_names: self.volume_names(),
        })
    }

    fn summary(&self, outcome: &SagaOutcome) -> AddonSummary {
        let mut summary = AddonSummary::new(self.identity.clone(), &self.cluster_name, outcome);
        summary.port = Some(POSTGRES_PORT);
        summary.domain = Some(service_host(&self.cluster_name, &self.identity.namespace));
        summary.username = Some("postgres".to_string());
        summary.password = output_string(outcome, "password");
        summary.database = self.databases.keys().next().cloned();
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saga::StepAction;

    fn params() -> PostgresParams {
        PostgresParams {
            name: "ledger".to_string(),
            namespace: "finance".to_string(),
            ..PostgresParams::default()
        }
    }

    #[test]
    fn test_defaults() {
        let definition = params().resolve(&AddonCatalog::default()).expect("resolve");
        assert_eq!(definition.cluster_name, "atom-ledger");
        assert_eq!(definition.instances, 2);
        assert_eq!(definition.volume.size, "1Gi");
        assert_eq!(definition.version, "11");
        assert_eq!(definition.credentials_secret(), "postgres.atom-ledger.credentials");
    }

    #[test]
    fn test_plan() {
        let mut p = params();
        p.team_id = Some("acid".to_string());
        p.instances = Some(3);
        let definition = p.resolve(&AddonCatalog::default()).expect("resolve");
        let plan = definition.plan().expect("plan");

        let names: Vec<&str> = plan.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["namespace", "cluster", "poll-credentials", "poll-statefulset-ready"]);

        match &plan[1].action {
            StepAction::Create { manifest, owned, .. } => {
                assert_eq!(manifest["metadata"]["name"], "acid-ledger");
                assert_eq!(manifest["spec"]["numberOfInstances"], 3);
                assert_eq!(owned.len(), 4);
                assert_eq!(owned[0].name, "pgdata-acid-ledger-0");
                assert_eq!(owned[3].name, "acid-ledger");
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_database_owner_must_be_user() {
        let mut p = params();
        p.databases = BTreeMap::from([("ledger".to_string(), "app".to_string())]);
        assert!(matches!(
            p.resolve(&AddonCatalog::default()),
            Err(ParamsError::Invalid { field: "databases", .. })
        ));

        p.users = BTreeMap::from([("app".to_string(), vec!["createdb".to_string()])]);
        assert!(p.resolve(&AddonCatalog::default()).is_ok());
    }

    #[test]
    fn test_invalid_team() {
        let mut p = params();
        p.team_id = Some("Team_A".to_string());
        assert!(matches!(
            p.resolve(&AddonCatalog::default()),
            Err(ParamsError::InvalidName { field: "teamId", .. })
        ));
    }
}
