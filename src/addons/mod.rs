//! Add-on definitions.
//!
//! Each add-on type declares its provisioning steps as data. A request is
//! resolved once against the [`AddonCatalog`] (defaults applied, names and
//! ranges validated) into an [`AddonDefinition`] that the provisioner runs.

mod atomapp;
mod manifests;
mod mysql5;
mod operator;
mod postgres;
mod redis;
mod simulated;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{is_valid_name, OperatorsConfig, PollingConfig, ServiceConfig};
use crate::error::{ParamsError, Result};
use crate::gateway::ResourceRef;
use crate::registry::{AddonIdentity, AddonPayload, AddonType};
use crate::saga::{SagaOutcome, Step};

pub use atomapp::AtomAppParams;
pub use mysql5::{mysql_cluster_kind, Mysql5Params};
pub use operator::{OperatorParams, OperatorPreset};
pub use postgres::{postgresql_kind, PostgresParams, PostgresVolume};
pub use redis::{redis_failover_kind, RedisParams};
pub use simulated::{simulated_gateway, OperatorSimulator};

/// A resolved add-on: identity, steps and how to describe the result.
pub trait AddonDefinition: Send + Sync {
    /// Identity of the instance this definition provisions.
    fn identity(&self) -> &AddonIdentity;

    /// Ordered provisioning steps.
    ///
    /// # Errors
    ///
    /// Returns an error if a manifest cannot be built.
    fn plan(&self) -> Result<Vec<Step>>;

    /// Type-specific record payload built from a successful run.
    fn payload(&self, outcome: &SagaOutcome) -> AddonPayload;

    /// Connection details reported to the caller.
    fn summary(&self, outcome: &SagaOutcome) -> AddonSummary;
}

/// What a caller learns about a provisioned add-on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonSummary {
    /// Instance identity.
    #[serde(flatten)]
    pub identity: AddonIdentity,
    /// In-cluster host name.
    pub host: String,
    /// Port, the node port when exported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i64>,
    /// External domain or address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Administrative user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Administrative password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Initial database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Owned resources, in creation order.
    #[serde(default)]
    pub resources: Vec<ResourceRef>,
}

impl AddonSummary {
    /// Creates a summary with only identity, host and resources set.
    #[must_use]
    pub fn new(identity: AddonIdentity, host: impl Into<String>, outcome: &SagaOutcome) -> Self {
        Self {
            identity,
            host: host.into(),
            port: None,
            domain: None,
            username: None,
            password: None,
            database: None,
            resources: outcome.resources.clone(),
        }
    }
}

/// A provisioning request, tagged by add-on type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AddonRequest {
    /// MySQL v5 cluster.
    #[serde(rename = "mysqlv5", alias = "mysql5")]
    Mysql5(Mysql5Params),
    /// PostgreSQL team cluster.
    #[serde(rename = "postgresql", alias = "postgres")]
    Postgres(PostgresParams),
    /// Redis failover.
    #[serde(rename = "redis")]
    Redis(RedisParams),
    /// Generic application.
    #[serde(rename = "atomapp")]
    AtomApp(AtomAppParams),
    /// Operator install.
    #[serde(rename = "operator")]
    Operator(OperatorParams),
}

impl AddonRequest {
    /// Add-on type of the request.
    #[must_use]
    pub const fn addon_type(&self) -> AddonType {
        match self {
            Self::Mysql5(_) => AddonType::MySqlV5,
            Self::Postgres(_) => AddonType::PostgreSql,
            Self::Redis(_) => AddonType::Redis,
            Self::AtomApp(_) => AddonType::AtomApp,
            Self::Operator(_) => AddonType::Operator,
        }
    }

    /// Parses a request from YAML or JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a valid request.
    pub fn from_yaml(content: &str) -> std::result::Result<Self, ParamsError> {
        serde_yaml::from_str(content).map_err(|e| ParamsError::Invalid {
            field: "request",
            message: e.to_string(),
        })
    }
}

/// Defaults and settings shared by every definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddonCatalog {
    /// Cluster id for requests that do not name one.
    pub cluster_id: String,
    /// Address exported services are reachable on.
    pub public_ip: Option<String>,
    /// Storage class for volume claims.
    pub storage_class: Option<String>,
    /// Readiness polling settings.
    pub polling: PollingConfig,
    /// Operator images.
    pub operators: OperatorsConfig,
}

impl Default for AddonCatalog {
    fn default() -> Self {
        Self::from_config(&ServiceConfig::default())
    }
}

impl AddonCatalog {
    /// Builds the catalog from the service configuration.
    #[must_use]
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            cluster_id: config.cluster.id.clone(),
            public_ip: config.cluster.public_ip.clone(),
            storage_class: config.cluster.storage_class.clone(),
            polling: config.polling,
            operators: config.operators.clone(),
        }
    }

    /// Resolves a request into its definition.
    ///
    /// # Errors
    ///
    /// Returns a [`ParamsError`] if the request is invalid.
    pub fn resolve(&self, request: &AddonRequest) -> std::result::Result<Box<dyn AddonDefinition>, ParamsError> {
        Ok(match request {
            AddonRequest::Mysql5(params) => Box::new(params.resolve(self)?),
            AddonRequest::Postgres(params) => Box::new(params.resolve(self)?),
            AddonRequest::Redis(params) => Box::new(params.resolve(self)?),
            AddonRequest::AtomApp(params) => Box::new(params.resolve(self)?),
            AddonRequest::Operator(params) => Box::new(params.resolve(self)?),
        })
    }

    /// Resolves the identity of a request, using the default cluster id.
    fn identity(
        &self,
        addon_type: AddonType,
        cluster_id: Option<&str>,
        namespace: &str,
        name: &str,
    ) -> std::result::Result<AddonIdentity, ParamsError> {
        check_name("name", name)?;
        check_name("namespace", namespace)?;
        let cluster_id = cluster_id.unwrap_or(&self.cluster_id);
        check_name("clusterId", cluster_id)?;
        Ok(AddonIdentity::new(addon_type, cluster_id, namespace, name))
    }
}

/// Checks a DNS-1123 label.
fn check_name(field: &'static str, value: &str) -> std::result::Result<(), ParamsError> {
    if is_valid_name(value) {
        Ok(())
    } else {
        Err(ParamsError::InvalidName {
            field,
            value: value.to_string(),
        })
    }
}

/// Applies a default and checks an inclusive range.
fn in_range(field: &'static str, value: Option<i32>, default: i32, min: i32, max: i32) -> std::result::Result<i32, ParamsError> {
    let value = value.unwrap_or(default);
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ParamsError::OutOfRange {
            field,
            value: i64::from(value),
            min: i64::from(min),
            max: i64::from(max),
        })
    }
}

/// Rejects an empty optional string.
fn non_empty(field: &'static str, value: Option<&String>) -> std::result::Result<(), ParamsError> {
    match value {
        Some(v) if v.trim().is_empty() => Err(ParamsError::Invalid {
            field,
            message: String::from("must not be empty"),
        }),
        _ => Ok(()),
    }
}

/// Reads an integer output of a readiness step.
fn output_i64(outcome: &SagaOutcome, key: &str) -> Option<i64> {
    outcome.outputs.get(key).and_then(Value::as_i64)
}

/// Reads a string output of a readiness step.
fn output_string(outcome: &SagaOutcome, key: &str) -> Option<String> {
    outcome.outputs.get(key).and_then(Value::as_str).map(str::to_string)
}

/// In-cluster DNS name of a service.
fn service_host(name: &str, namespace: &str) -> String {
    format!("{name}.{namespace}.svc")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_from_yaml() {
        let request = AddonRequest::from_yaml(
            r"
type: mysqlv5
name: orders
namespace: shop
members: 3
export: true
",
        )
        .expect("request");

        assert_eq!(request.addon_type(), AddonType::MySqlV5);
        match request {
            AddonRequest::Mysql5(params) => {
                assert_eq!(params.members, Some(3));
                assert!(params.export);
                assert!(params.cluster_id.is_none());
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result = AddonRequest::from_yaml("type: rabbitmq\nname: q\nnamespace: shop\n");
        assert!(matches!(result, Err(ParamsError::Invalid { field: "request", .. })));
    }

    #[test]
    fn test_identity_uses_default_cluster() {
        let catalog = AddonCatalog::default();
        let identity = catalog
            .identity(AddonType::Redis, None, "shop", "cache")
            .expect("identity");
        assert_eq!(identity.cluster_id, "default");

        assert!(matches!(
            catalog.identity(AddonType::Redis, None, "Shop", "cache"),
            Err(ParamsError::InvalidName { field: "namespace", .. })
        ));
    }

    #[test]
    fn test_in_range() {
        assert_eq!(in_range("members", None, 1, 1, 10).ok(), Some(1));
        assert_eq!(in_range("members", Some(10), 1, 1, 10).ok(), Some(10));
        assert!(matches!(
            in_range("members", Some(0), 1, 1, 10),
            Err(ParamsError::OutOfRange { value: 0, .. })
        ));
    }
}
