//! Configuration specification types for the add-on engine.
//!
//! This module defines the structs that map to the `atom-addons.yaml` file.
//! Every section is optional and falls back to the defaults below.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::readiness::PollSettings;

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Target cluster.
    pub cluster: ClusterConfig,
    /// Cluster gateway selection.
    pub gateway: GatewayConfig,
    /// Instance registry backend.
    pub registry: RegistryConfig,
    /// Readiness polling cadence and bounds.
    pub polling: PollingConfig,
    /// Operator images used by operator installs.
    pub operators: OperatorsConfig,
}

/// Target cluster configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cluster id used when a request does not name one.
    pub id: String,
    /// Address exported add-ons are reachable on.
    pub public_ip: Option<String>,
    /// Storage class for persistent volumes.
    pub storage_class: Option<String>,
    /// Kubeconfig path. In-cluster or default discovery otherwise.
    pub kubeconfig: Option<PathBuf>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            id: default_cluster_id(),
            public_ip: None,
            storage_class: None,
            kubeconfig: None,
        }
    }
}

/// Gateway configuration.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Which gateway to use.
    pub backend: GatewayBackend,
}

/// Gateway backends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GatewayBackend {
    /// A real cluster through the Kubernetes API.
    #[default]
    Kube,
    /// An in-process cluster with simulated operators.
    Simulated,
}

impl std::str::FromStr for GatewayBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kube" => Ok(Self::Kube),
            "simulated" => Ok(Self::Simulated),
            other => Err(format!("unknown gateway backend '{other}'")),
        }
    }
}

/// Registry configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Backend type.
    pub backend: RegistryBackend,
    /// Directory for the local backend.
    pub path: Option<PathBuf>,
    /// S3 bucket name (required for s3 backend).
    pub bucket: Option<String>,
    /// S3 key prefix.
    pub prefix: Option<String>,
    /// S3 region, AWS default if not specified.
    pub region: Option<String>,
}

/// Registry backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    /// One JSON file per instance in a local directory.
    #[default]
    Local,
    /// One JSON object per instance in an S3 bucket.
    S3,
    /// Process memory only.
    Memory,
}

impl std::str::FromStr for RegistryBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "s3" => Ok(Self::S3),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown registry backend '{other}'")),
        }
    }
}

/// Readiness polling configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PollingConfig {
    /// Time between evaluations in milliseconds.
    pub interval_ms: u64,
    /// Bound for node port allocation.
    pub port_timeout_secs: u64,
    /// Bound for generated secrets.
    pub secret_timeout_secs: u64,
    /// Bound for statefulset and deployment readiness.
    pub workload_timeout_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            port_timeout_secs: 8,
            secret_timeout_secs: 180,
            workload_timeout_secs: 600,
        }
    }
}

impl PollingConfig {
    /// Poll interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Settings for node port allocation.
    #[must_use]
    pub const fn port(&self) -> PollSettings {
        PollSettings::new(self.interval(), Duration::from_secs(self.port_timeout_secs))
    }

    /// Settings for generated secrets.
    #[must_use]
    pub const fn secret(&self) -> PollSettings {
        PollSettings::new(self.interval(), Duration::from_secs(self.secret_timeout_secs))
    }

    /// Settings for workload readiness.
    #[must_use]
    pub const fn workload(&self) -> PollSettings {
        PollSettings::new(self.interval(), Duration::from_secs(self.workload_timeout_secs))
    }
}

/// Operator images.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OperatorsConfig {
    /// MySQL v5 operator.
    pub mysql5: Mysql5OperatorConfig,
    /// Zalando postgres operator.
    pub postgres: OperatorImage,
    /// Spotahome redis operator.
    pub redis: RedisOperatorImage,
}

/// MySQL v5 operator images.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Mysql5OperatorConfig {
    /// Operator image.
    pub image: String,
    /// Agent sidecar image passed to the operator.
    pub agent_image: String,
}

impl Default for Mysql5OperatorConfig {
    fn default() -> Self {
        Self {
            image: String::from("cuijx/mysql5-operator:v0.18.2.1"),
            agent_image: String::from("cuijx/mysql5-agent"),
        }
    }
}

/// Image of the postgres operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OperatorImage {
    /// Operator image.
    pub image: String,
}

impl Default for OperatorImage {
    fn default() -> Self {
        Self {
            image: String::from("registry.opensource.zalan.do/acid/postgres-operator:v1.1.0"),
        }
    }
}

/// Image of the redis operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RedisOperatorImage {
    /// Operator image.
    pub image: String,
}

impl Default for RedisOperatorImage {
    fn default() -> Self {
        Self {
            image: String::from("quay.io/spotahome/redis-operator:latest"),
        }
    }
}

fn default_cluster_id() -> String {
    String::from("default")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.cluster.id, "default");
        assert_eq!(config.gateway.backend, GatewayBackend::Kube);
        assert_eq!(config.registry.backend, RegistryBackend::Local);
        assert_eq!(config.polling.port().timeout, Duration::from_secs(8));
        assert_eq!(config.polling.secret().timeout, Duration::from_secs(180));
        assert_eq!(config.polling.workload().interval, Duration::from_millis(100));
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("S3".parse::<RegistryBackend>(), Ok(RegistryBackend::S3));
        assert_eq!("simulated".parse::<GatewayBackend>(), Ok(GatewayBackend::Simulated));
        assert!("etcd".parse::<RegistryBackend>().is_err());
    }
}
