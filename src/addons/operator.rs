//! Operator installs.
//!
//! An operator install is the cluster-wide half of an add-on: CRDs, RBAC and
//! the operator deployment itself. Cluster-scoped objects are owned by the
//! install and removed on teardown.

use k8s_openapi::api::rbac::v1::PolicyRule;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::config::OperatorsConfig;
use crate::error::{ParamsError, Result};
use crate::gateway::{CustomKind, ResourceKind, ResourceRef};
use crate::readiness::ReadinessCondition;
use crate::registry::{AddonIdentity, AddonPayload, AddonType, OperatorAddonData};
use crate::saga::{SagaOutcome, Step};

use super::manifests::{self, crd_name, label, rule, ContainerSpec};
use super::{mysql_cluster_kind, postgresql_kind, redis_failover_kind, AddonCatalog, AddonDefinition, AddonSummary};

/// Known operator presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatorPreset {
    /// MySQL v5 operator and its agent.
    #[serde(rename = "mysql5-operator")]
    Mysql5,
    /// Zalando postgres operator.
    #[serde(rename = "postgres-operator")]
    Postgres,
    /// Spotahome redis operator.
    #[serde(rename = "redis-operator")]
    Redis,
}

impl OperatorPreset {
    /// All presets.
    pub const ALL: [Self; 3] = [Self::Mysql5, Self::Postgres, Self::Redis];

    /// Preset name, also the instance name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mysql5 => "mysql5-operator",
            Self::Postgres => "postgres-operator",
            Self::Redis => "redis-operator",
        }
    }
}

impl fmt::Display for OperatorPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatorPreset {
    type Err = ParamsError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|preset| preset.as_str() == s)
            .ok_or_else(|| ParamsError::UnknownOperator { name: s.to_string() })
    }
}

/// Parameters of an operator install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorParams {
    /// Preset name.
    pub name: String,
    /// Namespace the operator runs in.
    pub namespace: String,
    /// Target cluster id.
    #[serde(default)]
    pub cluster_id: Option<String>,
    /// Image override.
    #[serde(default)]
    pub image: Option<String>,
}

impl OperatorParams {
    pub(super) fn resolve(&self, catalog: &AddonCatalog) -> std::result::Result<OperatorDefinition, ParamsError> {
        let preset: OperatorPreset = self.name.parse()?;
        let identity = catalog.identity(
            AddonType::Operator,
            self.cluster_id.as_deref(),
            &self.namespace,
            preset.as_str(),
        )?;
        let mut install = Install::of(preset, &catalog.operators);
        if let Some(image) = &self.image {
            if image.trim().is_empty() {
                return Err(ParamsError::Invalid {
                    field: "image",
                    message: String::from("must not be empty"),
                });
            }
            install.container.image.clone_from(image);
        }

        Ok(OperatorDefinition {
            identity,
            install,
            catalog: catalog.clone(),
        })
    }
}

/// The objects one preset installs.
#[derive(Debug, Clone)]
struct Install {
    deployment: String,
    container: ContainerSpec,
    crds: Vec<(CustomKind, &'static str)>,
    service_accounts: Vec<String>,
    cluster_roles: Vec<(String, Vec<PolicyRule>)>,
    /// Binding name, cluster role, service account.
    bindings: Vec<(String, String, String)>,
    config_map: Option<(String, BTreeMap<String, String>)>,
    service: Option<(String, i32)>,
}

fn same(name: &str) -> (String, String, String) {
    (name.to_string(), name.to_string(), name.to_string())
}

impl Install {
    fn of(preset: OperatorPreset, images: &OperatorsConfig) -> Self {
        match preset {
            OperatorPreset::Mysql5 => Self::mysql5(images),
            OperatorPreset::Postgres => Self::postgres(images),
            OperatorPreset::Redis => Self::redis(images),
        }
    }

    fn mysql5(images: &OperatorsConfig) -> Self {
        let mysql = |kind: &str, plural: &str| CustomKind::new("mysql.oracle.com", "v1", kind, plural);
        let custom_resources = [
            "mysql5backups",
            "mysql5backupschedules",
            "mysql5clusters",
            "mysql5clusters/finalizers",
            "mysql5restores",
        ];
        let watch = ["get", "list", "patch", "update", "watch"];

        Self {
            deployment: "mysql5-operator".to_string(),
            container: ContainerSpec {
                image: images.mysql5.image.clone(),
                args: vec![
                    "--v=4".to_string(),
                    format!("--mysql-agent-image={}", images.mysql5.agent_image),
                ],
                port: Some(10254),
                service_account: Some("mysql5-operator".to_string()),
                ..ContainerSpec::default()
            },
            crds: vec![
                (mysql_cluster_kind(), "mysql5cluster"),
                (mysql("MySQLBackup", "mysql5backups"), "mysql5backup"),
                (mysql("MySQLRestore", "mysql5restores"), "mysql5restore"),
                (mysql("MySQLBackupSchedule", "mysql5backupschedules"), "mysql5backupschedule"),
            ],
            service_accounts: vec!["mysql5-operator".to_string(), "mysql5-agent".to_string()],
            cluster_roles: vec![
                (
                    "mysql5-operator".to_string(),
                    vec![
                        rule(&[""], &["pods"], &watch),
                        rule(&[""], &["secrets"], &["get", "create"]),
                        rule(&[""], &["services", "configmaps"], &["create", "get", "list", "watch"]),
                        rule(&[""], &["events"], &["create", "update", "patch"]),
                        rule(&["apps"], &["statefulsets"], &["create", "get", "list", "patch", "update", "watch"]),
                        rule(&["mysql.oracle.com"], &custom_resources, &watch),
                        rule(&["mysql.oracle.com"], &["mysql5backups"], &["create"]),
                    ],
                ),
                (
                    "mysql5-agent".to_string(),
                    vec![
                        rule(&[""], &["pods"], &watch),
                        rule(&[""], &["secrets"], &["get"]),
                        rule(&[""], &["events"], &["create", "update", "patch"]),
                        rule(&["mysql.oracle.com"], &custom_resources, &watch),
                    ],
                ),
            ],
            bindings: vec![
                same("mysql5-operator"),
                ("mysql5-agent".to_string(), "mysql5-operator".to_string(), "mysql5-agent".to_string()),
            ],
            config_map: None,
            service: None,
        }
    }

    fn postgres(images: &OperatorsConfig) -> Self {
        let all = ["create", "delete", "deletecollection", "get", "list", "patch", "update", "watch"];
        let config = [
            ("api_port", "8080"),
            ("cluster_domain", "cluster.local"),
            ("cluster_labels", "application:spilo"),
            ("cluster_name_label", "cluster-name"),
            ("enable_crd_validation", "false"),
            ("enable_master_load_balancer", "false"),
            ("enable_replica_load_balancer", "false"),
            ("enable_teams_api", "false"),
            ("pod_role_label", "spilo-role"),
            ("pod_service_account_name", "postgres-pod"),
            ("watched_namespace", "*"),
        ];

        Self {
            deployment: "postgres-operator".to_string(),
            container: ContainerSpec {
                image: images.postgres.image.clone(),
                port: Some(8080),
                env: BTreeMap::from([("CONFIG_MAP_NAME".to_string(), "postgres-operator".to_string())]),
                service_account: Some("postgres-operator".to_string()),
                ..ContainerSpec::default()
            },
            crds: vec![(postgresql_kind(), "postgresql")],
            service_accounts: vec!["postgres-operator".to_string()],
            cluster_roles: vec![
                (
                    "postgres-operator".to_string(),
                    vec![
                        rule(&["acid.zalan.do"], &["postgresqls", "postgresqls/status", "operatorconfigurations"], &all),
                        rule(&["apiextensions.k8s.io"], &["customresourcedefinitions"], &["create", "get", "patch", "update"]),
                        rule(&[""], &["configmaps"], &["get"]),
                        rule(&[""], &["events"], &["create", "get", "list", "patch", "update", "watch"]),
                        rule(&[""], &["endpoints", "services"], &all),
                        rule(&[""], &["secrets"], &["create", "get", "delete", "update"]),
                        rule(&[""], &["nodes"], &["get", "list", "watch"]),
                        rule(&[""], &["persistentvolumeclaims"], &["delete", "get", "list"]),
                        rule(&[""], &["persistentvolumes"], &["get", "list", "update"]),
                        rule(&[""], &["pods"], &["delete", "get", "list", "patch", "update", "watch"]),
                        rule(&["apps"], &["statefulsets", "deployments"], &all),
                        rule(&["policy"], &["poddisruptionbudgets"], &["create", "delete", "get"]),
                        rule(&[""], &["serviceaccounts"], &["get", "create"]),
                        rule(&["rbac.authorization.k8s.io"], &["rolebindings"], &["get", "create"]),
                    ],
                ),
                (
                    "postgres-pod".to_string(),
                    vec![
                        rule(&[""], &["endpoints"], &all),
                        rule(&[""], &["pods"], &["get", "list", "patch", "update", "watch"]),
                        rule(&[""], &["services"], &["create"]),
                    ],
                ),
            ],
            bindings: vec![same("postgres-operator")],
            config_map: Some((
                "postgres-operator".to_string(),
                config.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect(),
            )),
            service: Some(("postgres-operator".to_string(), 8080)),
        }
    }

    fn redis(images: &OperatorsConfig) -> Self {
        let all = ["create", "delete", "get", "list", "patch", "update", "watch"];

        Self {
            deployment: "redisoperator".to_string(),
            container: ContainerSpec {
                image: images.redis.image.clone(),
                service_account: Some("redisoperator".to_string()),
                ..ContainerSpec::default()
            },
            crds: vec![(redis_failover_kind(), "redisfailover")],
            service_accounts: vec!["redisoperator".to_string()],
            cluster_roles: vec![(
                "redisoperator".to_string(),
                vec![
                    rule(&["databases.spotahome.com"], &["redisfailovers"], &["*"]),
                    rule(&["apiextensions.k8s.io"], &["customresourcedefinitions"], &["*"]),
                    rule(&[""], &["pods", "services", "endpoints", "events", "configmaps"], &["*"]),
                    rule(&[""], &["secrets"], &["get"]),
                    rule(&["apps"], &["deployments", "statefulsets"], &all),
                    rule(&["policy"], &["poddisruptionbudgets"], &["*"]),
                ],
            )],
            bindings: vec![same("redisoperator")],
            config_map: None,
            service: None,
        }
    }
}

/// A resolved operator install.
#[derive(Debug, Clone)]
pub struct OperatorDefinition {
    identity: AddonIdentity,
    install: Install,
    catalog: AddonCatalog,
}

impl AddonDefinition for OperatorDefinition {
    fn identity(&self) -> &AddonIdentity {
        &self.identity
    }

    fn plan(&self) -> Result<Vec<Step>> {
        let ns = self.identity.namespace.as_str();
        let install = &self.install;
        let mut steps = vec![Step::ensure_namespace("namespace", ns)];

        for (kind, singular) in &install.crds {
            let name = crd_name(kind);
            steps.push(Step::create(
                &format!("crd-{}", kind.plural),
                ResourceRef::cluster(ResourceKind::CustomResourceDefinition, &name),
                manifests::custom_resource_definition(kind, singular)?,
            ));
        }

        if let Some((name, data)) = &install.config_map {
            steps.push(Step::create(
                "config-map",
                ResourceRef::namespaced(ResourceKind::ConfigMap, ns, name),
                manifests::config_map(name, data.clone())?,
            ));
        }

        for name in &install.service_accounts {
            steps.push(Step::create(
                &format!("service-account-{name}"),
                ResourceRef::namespaced(ResourceKind::ServiceAccount, ns, name),
                manifests::service_account(name)?,
            ));
        }

        for (name, rules) in &install.cluster_roles {
            steps.push(Step::create(
                &format!("cluster-role-{name}"),
                ResourceRef::cluster(ResourceKind::ClusterRole, name),
                manifests::cluster_role(name, rules.clone())?,
            ));
        }

        for (name, role, account) in &install.bindings {
            steps.push(Step::create(
                &format!("cluster-role-binding-{name}"),
                ResourceRef::cluster(ResourceKind::ClusterRoleBinding, name),
                manifests::cluster_role_binding(name, role, account, ns)?,
            ));
        }

        let labels = label("name", &install.deployment);
        steps.push(Step::create(
            "deployment",
            ResourceRef::namespaced(ResourceKind::Deployment, ns, &install.deployment),
            manifests::deployment(&install.deployment, &labels, 1, &install.container)?,
        ));

        if let Some((name, port)) = &install.service {
            steps.push(Step::create(
                "service",
                ResourceRef::namespaced(ResourceKind::Service, ns, name),
                manifests::service(name, &labels, *port, false)?,
            ));
        }

        steps.push(Step::await_ready(
            "poll-deployment-ready",
            "deployment-ready",
            ResourceRef::namespaced(ResourceKind::Deployment, ns, &install.deployment),
            ReadinessCondition::DeploymentReady,
            self.catalog.polling.workload(),
        ));

        Ok(steps)
    }

    fn payload(&self, _outcome: &SagaOutcome) -> AddonPayload {
        let install = &self.install;
        AddonPayload::Operator(OperatorAddonData {
            deployment_name: install.deployment.clone(),
            image: install.container.image.clone(),
            crd_names: install.crds.iter().map(|(kind, _)| crd_name(kind)).collect(),
            service_account_names: install.service_accounts.clone(),
            cluster_role_names: install.cluster_roles.iter().map(|(name, _)| name.clone()).collect(),
            cluster_role_binding_names: install.bindings.iter().map(|(name, _, _)| name.clone()).collect(),
            config_map_name: install.config_map.as_ref().map(|(name, _)| name.clone()),
            service_name: install.service.as_ref().map(|(name, _)| name.clone()),
        })
    }

    fn summary(&self, outcome: &SagaOutcome) -> AddonSummary {
        let mut summary = AddonSummary::new(self.identity.clone(), &self.install.deployment, outcome);
        summary.port = self.install.service.as_ref().map(|(_, port)| i64::from(*port));
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saga::StepAction;
    use serde_json::Value;

    fn container_image(manifest: &Value) -> Option<&str> {
        manifest
            .pointer("/spec/template/spec/containers/0/image")
            .and_then(Value::as_str)
    }

    fn params(name: &str) -> OperatorParams {
        OperatorParams {
            name: name.to_string(),
            namespace: "operators".to_string(),
            cluster_id: None,
            image: None,
        }
    }

    #[test]
    fn test_unknown_preset() {
        assert!(matches!(
            params("kafka-operator").resolve(&AddonCatalog::default()),
            Err(ParamsError::UnknownOperator { .. })
        ));
    }

    #[test]
    fn test_mysql5_plan_order() {
        let definition = params("mysql5-operator").resolve(&AddonCatalog::default()).expect("resolve");
        let plan = definition.plan().expect("plan");
        let names: Vec<&str> = plan.iter().map(|s| s.name.as_str()).collect();

        assert_eq!(names[0], "namespace");
        assert_eq!(names[1], "crd-mysql5clusters");
        assert_eq!(names.len(), 1 + 4 + 2 + 2 + 2 + 1 + 1);
        assert_eq!(names[names.len() - 2], "deployment");

        let deployment = plan.iter().find(|s| s.name == "deployment").expect("deployment");
        match &deployment.action {
            StepAction::Create { manifest, .. } => {
                assert_eq!(container_image(manifest), Some("cuijx/mysql5-operator:v0.18.2.1"));
                assert_eq!(
                    manifest["spec"]["template"]["spec"]["containers"][0]["args"][1],
                    "--mysql-agent-image=cuijx/mysql5-agent"
                );
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_image_override_and_payload() {
        let mut p = params("redis-operator");
        p.image = Some("quay.io/spotahome/redis-operator:v1.2.4".to_string());
        let definition = p.resolve(&AddonCatalog::default()).expect("resolve");
        assert_eq!(definition.identity().name, "redis-operator");

        match definition.payload(&SagaOutcome::default()) {
            AddonPayload::Operator(data) => {
                assert_eq!(data.image, "quay.io/spotahome/redis-operator:v1.2.4");
                assert_eq!(data.crd_names, vec!["redisfailovers.databases.spotahome.com"]);
                assert_eq!(data.cluster_role_binding_names, vec!["redisoperator"]);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_postgres_install_has_config_and_service() {
        let definition = params("postgres-operator").resolve(&AddonCatalog::default()).expect("resolve");
        let names: Vec<String> = definition.plan().expect("plan").into_iter().map(|s| s.name).collect();
        assert!(names.contains(&"config-map".to_string()));
        assert!(names.contains(&"service".to_string()));
        assert!(names.contains(&"cluster-role-postgres-pod".to_string()));
    }
}
