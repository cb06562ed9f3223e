//! MySQL v5 clusters managed by the `mysql.oracle.com` operator.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::error::{ParamsError, Result};
use crate::gateway::{CustomKind, ResourceKind, ResourceRef};
use crate::readiness::ReadinessCondition;
use crate::registry::{AddonIdentity, AddonPayload, AddonType, MySqlAddonData};
use crate::saga::{SagaOutcome, Step};

use super::manifests::{self, label, volume_claim_template};
use super::{
    in_range, non_empty, output_i64, output_string, service_host, AddonCatalog, AddonDefinition,
    AddonSummary,
};

/// Shared service account the operator's agent sidecar runs as.
const AGENT_ACCOUNT: &str = "mysql-agent";

/// Cluster role installed by the operator.
const OPERATOR_ROLE: &str = "mysql5-operator";

/// Label the operator puts on cluster pods.
const CLUSTER_LABEL: &str = "v1.mysql.oracle.com/cluster";

const MYSQL_PORT: i32 = 3306;
const DEFAULT_STORAGE: &str = "1Gi";
const PASSWORD_KEY: &str = "password";

/// The operator's cluster resource.
#[must_use]
pub fn mysql_cluster_kind() -> CustomKind {
    CustomKind::new("mysql.oracle.com", "v1", "MySQLCluster", "mysql5clusters")
}

/// Parameters of a MySQL v5 cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mysql5Params {
    /// Cluster name.
    pub name: String,
    /// Target namespace.
    pub namespace: String,
    /// Target cluster id.
    #[serde(default)]
    pub cluster_id: Option<String>,
    /// Number of members, 1 to 10.
    #[serde(default)]
    pub members: Option<i32>,
    /// Initial database.
    #[serde(default)]
    pub database: Option<String>,
    /// Expose the cluster through a node port.
    #[serde(default)]
    pub export: bool,
    /// Custom configuration files, name to base64 content.
    #[serde(default)]
    pub config: Option<BTreeMap<String, String>>,
    /// Root password. Generated by the operator when absent.
    #[serde(default)]
    pub root_password: Option<String>,
    /// Data volume size.
    #[serde(default)]
    pub storage: Option<String>,
    /// Backup volume size. No backup volumes when absent.
    #[serde(default)]
    pub backup_storage: Option<String>,
}

impl Mysql5Params {
    pub(super) fn resolve(&self, catalog: &AddonCatalog) -> std::result::Result<Mysql5Definition, ParamsError> {
        let identity = catalog.identity(
            AddonType::MySqlV5,
            self.cluster_id.as_deref(),
            &self.namespace,
            &self.name,
        )?;
        let members = in_range("members", self.members, 1, 1, 10)?;
        non_empty("rootPassword", self.root_password.as_ref())?;
        non_empty("database", self.database.as_ref())?;
        non_empty("storage", self.storage.as_ref())?;
        non_empty("backupStorage", self.backup_storage.as_ref())?;

        let config = self
            .config
            .as_ref()
            .map(|files| {
                files
                    .iter()
                    .map(|(file, encoded)| {
                        let bytes = STANDARD.decode(encoded).map_err(|e| ParamsError::Invalid {
                            field: "config",
                            message: format!("{file}: {e}"),
                        })?;
                        let content = String::from_utf8(bytes).map_err(|e| ParamsError::Invalid {
                            field: "config",
                            message: format!("{file}: {e}"),
                        })?;
                        Ok((file.clone(), content))
                    })
                    .collect::<std::result::Result<BTreeMap<_, _>, ParamsError>>()
            })
            .transpose()?;

        Ok(Mysql5Definition {
            identity,
            members,
            config,
            root_password: self.root_password.clone(),
            export: self.export,
            database: self.database.clone(),
            storage: self.storage.clone().unwrap_or_else(|| DEFAULT_STORAGE.to_string()),
            backup_storage: self.backup_storage.clone(),
            catalog: catalog.clone(),
        })
    }
}

/// A resolved MySQL v5 cluster.
#[derive(Debug, Clone)]
pub struct Mysql5Definition {
    identity: AddonIdentity,
    members: i32,
    config: Option<BTreeMap<String, String>>,
    root_password: Option<String>,
    export: bool,
    database: Option<String>,
    storage: String,
    backup_storage: Option<String>,
    catalog: AddonCatalog,
}

impl Mysql5Definition {
    fn name(&self) -> &str {
        &self.identity.name
    }

    fn namespace(&self) -> &str {
        &self.identity.namespace
    }

    fn config_map_name(&self) -> Option<String> {
        self.config.as_ref().map(|_| format!("{}-cnf", self.name()))
    }

    fn user_secret_name(&self) -> Option<String> {
        self.root_password
            .as_ref()
            .map(|_| format!("{}-root-user-secret", self.name()))
    }

    fn node_port_service_name(&self) -> Option<String> {
        self.export.then(|| format!("{}-public", self.name()))
    }

    /// The supplied secret, or the one the operator generates.
    fn password_secret_name(&self) -> String {
        self.user_secret_name()
            .unwrap_or_else(|| format!("{}-root-password", self.name()))
    }

    fn volume_names(&self, prefix: &str) -> Vec<String> {
        (0..self.members)
            .map(|i| format!("{prefix}-{}-{i}", self.name()))
            .collect()
    }

    fn backup_volume_names(&self) -> Vec<String> {
        if self.backup_storage.is_some() {
            self.volume_names("backup")
        } else {
            Vec::new()
        }
    }

    fn cluster_manifest(&self) -> Value {
        let mut spec = Map::new();
        spec.insert("replicas".to_string(), json!(self.members));
        if let Some(name) = self.config_map_name() {
            spec.insert("configRef".to_string(), json!({ "name": name }));
        }
        if let Some(name) = self.user_secret_name() {
            spec.insert("secretRef".to_string(), json!({ "name": name }));
        }
        let storage_class = self.catalog.storage_class.as_deref();
        spec.insert(
            "volumeClaimTemplate".to_string(),
            volume_claim_template("data", &self.storage, storage_class),
        );
        if let Some(size) = &self.backup_storage {
            spec.insert(
                "backupVolumeClaimTemplate".to_string(),
                volume_claim_template("backup", size, storage_class),
            );
        }
        if let Some(database) = &self.database {
            spec.insert("initDBName".to_string(), json!(database));
        }

        json!({
            "metadata": { "name": self.name() },
            "spec": spec,
        })
    }
}

impl AddonDefinition for Mysql5Definition {
    fn identity(&self) -> &AddonIdentity {
        &self.identity
    }

    fn plan(&self) -> Result<Vec<Step>> {
        let ns = self.namespace();
        let name = self.name();
        let polling = &self.catalog.polling;
        let mut steps = vec![
            Step::ensure_namespace("namespace", ns),
            Step::ensure_shared(
                "rbac-service-account",
                ResourceRef::namespaced(ResourceKind::ServiceAccount, ns, AGENT_ACCOUNT),
                manifests::service_account(AGENT_ACCOUNT)?,
            ),
            Step::ensure_shared(
                "rbac-role-binding",
                ResourceRef::namespaced(ResourceKind::RoleBinding, ns, AGENT_ACCOUNT),
                manifests::role_binding(AGENT_ACCOUNT, ns, OPERATOR_ROLE, AGENT_ACCOUNT)?,
            ),
        ];

        // Referenced by name from the cluster resource, so created before it
        if let (Some(cm), Some(files)) = (self.config_map_name(), &self.config) {
            steps.push(Step::create(
                "config-map",
                ResourceRef::namespaced(ResourceKind::ConfigMap, ns, &cm),
                manifests::config_map(&cm, files.clone())?,
            ));
        }
        if let (Some(secret), Some(password)) = (self.user_secret_name(), &self.root_password) {
            steps.push(Step::create(
                "root-secret",
                ResourceRef::namespaced(ResourceKind::Secret, ns, &secret),
                manifests::opaque_secret(&secret, PASSWORD_KEY, password)?,
            ));
        }
        if let Some(svc) = self.node_port_service_name() {
            steps.push(Step::create(
                "node-port-service",
                ResourceRef::namespaced(ResourceKind::Service, ns, &svc),
                manifests::service(&svc, &label(CLUSTER_LABEL, name), MYSQL_PORT, true)?,
            ));
        }

        let volumes = self
            .volume_names("data")
            .into_iter()
            .chain(self.backup_volume_names())
            .map(|pvc| ResourceRef::namespaced(ResourceKind::PersistentVolumeClaim, ns, &pvc))
            .collect();
        steps.push(Step::create_with_derived(
            "cluster",
            ResourceRef::namespaced(ResourceKind::Custom(mysql_cluster_kind()), ns, name),
            self.cluster_manifest(),
            volumes,
        ));

        if let Some(svc) = self.node_port_service_name() {
            steps.push(
                Step::await_ready(
                    "poll-port",
                    "port-allocated",
                    ResourceRef::namespaced(ResourceKind::Service, ns, &svc),
                    ReadinessCondition::NodePortAllocated,
                    polling.port(),
                )
                .output("port"),
            );
        }
        steps.push(
            Step::await_ready(
                "poll-password",
                "root-password",
                ResourceRef::namespaced(ResourceKind::Secret, ns, &self.password_secret_name()),
                ReadinessCondition::SecretKeyPresent {
                    key: PASSWORD_KEY.to_string(),
                },
                polling.secret(),
            )
            .output("password"),
        );
        steps.push(Step::await_ready(
            "poll-statefulset-ready",
            "statefulset-ready",
            ResourceRef::namespaced(ResourceKind::StatefulSet, ns, name),
            ReadinessCondition::StatefulSetReady,
            polling.workload(),
        ));

        Ok(steps)
    }

    fn payload(&self, outcome: &SagaOutcome) -> AddonPayload {
        let domain = if self.export {
            self.catalog.public_ip.clone()
        } else {
            Some(service_host(self.name(), self.namespace()))
        };

        AddonPayload::MySql(MySqlAddonData {
            statefulset_name: self.name().to_string(),
            service_name: self.name().to_string(),
            node_port_service_name: self.node_port_service_name(),
            port: output_i64(outcome, "port").and_then(|p| i32::try_from(p).ok()),
            service_domain: domain,
            members: self.members,
            config_map_name: self.config_map_name(),
            root_password_secret_name: self.password_secret_name(),
            data_volume_names: self.volume_names("data"),
            backup_volume_names: self.backup_volume_names(),
        })
    }

    fn summary(&self, outcome: &SagaOutcome) -> AddonSummary {
        let mut summary = AddonSummary::new(self.identity.clone(), self.name(), outcome);
        if self.export {
            summary.port = output_i64(outcome, "port");
            summary.domain.clone_from(&self.catalog.public_ip);
        } else {
            summary.port = Some(i64::from(MYSQL_PORT));
            summary.domain = Some(service_host(self.name(), self.namespace()));
        }
        summary.username = Some("root".to_string());
        summary.password = output_string(outcome, "password");
        summary.database.clone_from(&self.database);
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saga::StepAction;

    fn params() -> Mysql5Params {
        Mysql5Params {
            name: "orders".to_string(),
            namespace: "shop".to_string(),
            ..Mysql5Params::default()
        }
    }

    fn step_names(definition: &Mysql5Definition) -> Vec<String> {
        definition
            .plan()
            .expect("plan")
            .into_iter()
            .map(|s| s.name)
            .collect()
    }

    #[test]
    fn test_minimal_plan() {
        let definition = params().resolve(&AddonCatalog::default()).expect("resolve");
        assert_eq!(
            step_names(&definition),
            vec![
                "namespace",
                "rbac-service-account",
                "rbac-role-binding",
                "cluster",
                "poll-password",
                "poll-statefulset-ready",
            ]
        );
    }

    #[test]
    fn test_full_plan_orders_references_before_cluster() {
        let mut p = params();
        p.export = true;
        p.config = Some(BTreeMap::from([(
            "my.cnf".to_string(),
            STANDARD.encode("[mysqld]\nmax_connections=500\n"),
        )]));
        p.root_password = Some("s3cr3t".to_string());
        p.members = Some(2);
        p.backup_storage = Some("2Gi".to_string());

        let definition = p.resolve(&AddonCatalog::default()).expect("resolve");
        let names = step_names(&definition);
        let position = |n: &str| names.iter().position(|s| s == n).expect(n);

        assert!(position("config-map") < position("cluster"));
        assert!(position("root-secret") < position("cluster"));
        assert!(position("node-port-service") < position("poll-port"));
        assert!(position("cluster") < position("poll-port"));

        let plan = definition.plan().expect("plan");
        let cluster = plan.iter().find(|s| s.name == "cluster").expect("cluster step");
        match &cluster.action {
            StepAction::Create { manifest, owned, .. } => {
                assert_eq!(manifest["spec"]["configRef"]["name"], "orders-cnf");
                assert_eq!(manifest["spec"]["secretRef"]["name"], "orders-root-user-secret");
                let owned: Vec<&str> = owned.iter().map(|r| r.name.as_str()).collect();
                assert_eq!(
                    owned,
                    vec!["data-orders-0", "data-orders-1", "backup-orders-0", "backup-orders-1", "orders"]
                );
            }
            other => panic!("unexpected action: {other:?}"),
        }

        let config = plan.iter().find(|s| s.name == "config-map").expect("config step");
        match &config.action {
            StepAction::Create { manifest, .. } => {
                assert_eq!(manifest["data"]["my.cnf"], "[mysqld]\nmax_connections=500\n");
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_password_poll_targets_supplied_secret() {
        let mut p = params();
        p.root_password = Some("s3cr3t".to_string());
        let definition = p.resolve(&AddonCatalog::default()).expect("resolve");
        assert_eq!(definition.password_secret_name(), "orders-root-user-secret");

        let generated = params().resolve(&AddonCatalog::default()).expect("resolve");
        assert_eq!(generated.password_secret_name(), "orders-root-password");
    }

    #[test]
    fn test_members_out_of_range() {
        let mut p = params();
        p.members = Some(11);
        assert!(matches!(
            p.resolve(&AddonCatalog::default()),
            Err(ParamsError::OutOfRange { field: "members", .. })
        ));
    }

    #[test]
    fn test_invalid_config_encoding() {
        let mut p = params();
        p.config = Some(BTreeMap::from([("my.cnf".to_string(), "%%%".to_string())]));
        assert!(matches!(
            p.resolve(&AddonCatalog::default()),
            Err(ParamsError::Invalid { field: "config", .. })
        ));
    }

    #[test]
    fn test_payload_from_outcome() {
        let mut p = params();
        p.export = true;
        let mut catalog = AddonCatalog::default();
        catalog.public_ip = Some("10.0.0.10".to_string());
        let definition = p.resolve(&catalog).expect("resolve");

        let mut outcome = SagaOutcome::default();
        outcome.outputs.insert("port".to_string(), json!(30001));
        outcome.outputs.insert("password".to_string(), json!("generated"));

        match definition.payload(&outcome) {
            AddonPayload::MySql(data) => {
                assert_eq!(data.port, Some(30001));
                assert_eq!(data.node_port_service_name.as_deref(), Some("orders-public"));
                assert_eq!(data.service_domain.as_deref(), Some("10.0.0.10"));
                assert_eq!(data.data_volume_names, vec!["data-orders-0"]);
                assert!(data.backup_volume_names.is_empty());
            }
            other => panic!("unexpected payload: {other:?}"),
        }

        let summary = definition.summary(&outcome);
        assert_eq!(summary.port, Some(30001));
        assert_eq!(summary.password.as_deref(), Some("generated"));
    }
}
